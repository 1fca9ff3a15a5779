//! Event dispatch.
//!
//! The [`Dispatcher`] routes each inbound event: control events go to the
//! session registry or the store, chat messages run the
//! gate → read history → generate → re-check gate → record sequence.

use crate::config::AssistantConfig;
use crate::error::DispatchError;
use crate::event::{
    ActivationRequest, BotEvent, ConnectivityChange, InboundMessage, RememberRequest, Reply,
};
use kanna_ai::{LlmBackend, LlmMessage, LlmRequest};
use kanna_conversation::{
    ContextBuilder, ContextEntry, ContextRole, ConversationStore, DocumentRepository,
    JsonFileRepository, NewMessage, SessionRegistry,
};
use kanna_core::{ChannelId, CommunityId, Result};
use rootcause::prelude::ResultExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, trace};

type TurnKey = (CommunityId, ChannelId);

/// Per-channel locks serializing reply turns.
///
/// An entry lives only while a turn holds or waits for it.
#[derive(Debug, Default)]
struct TurnLocks {
    locks: Mutex<HashMap<TurnKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnLocks {
    async fn acquire(&self, community_id: &CommunityId, channel_id: &ChannelId) -> TurnGuard<'_> {
        let key = (community_id.clone(), channel_id.clone());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        TurnGuard {
            locks: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Holds a channel's turn; releasing the last holder removes the entry.
struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    key: TurnKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the Arc under this same map lock.
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Routes bot events to the session registry, the store and the backend.
pub struct Dispatcher<B, R = JsonFileRepository> {
    sessions: Arc<SessionRegistry>,
    store: ConversationStore<R>,
    backend: B,
    assistant: AssistantConfig,
    turns: TurnLocks,
}

impl<B: LlmBackend, R: DocumentRepository> Dispatcher<B, R> {
    /// Creates a dispatcher.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        store: ConversationStore<R>,
        backend: B,
        assistant: AssistantConfig,
    ) -> Self {
        Self {
            sessions,
            store,
            backend,
            assistant,
            turns: TurnLocks::default(),
        }
    }

    /// Returns the session registry.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Returns the conversation store.
    pub fn store(&self) -> &ConversationStore<R> {
        &self.store
    }

    /// Handles one event, returning the reply to send, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if reading history, generating, or recording failed.
    /// Nothing is sent in that case.
    pub async fn handle(&self, event: BotEvent) -> Result<Option<Reply>, DispatchError> {
        match event {
            BotEvent::Message(message) => self.respond(message).await,
            BotEvent::Activate(request) => {
                self.activate(&request);
                Ok(None)
            }
            BotEvent::Connectivity(change) => {
                self.connectivity_changed(&change);
                Ok(None)
            }
            BotEvent::Remember(request) => {
                self.remember(&request).await?;
                Ok(None)
            }
        }
    }

    /// Makes the requested channel the community's active channel.
    pub fn activate(&self, request: &ActivationRequest) {
        debug!(
            community = %request.community_id,
            channel = %request.channel_id,
            requested_by = %request.requesting_user_id,
            "activation requested"
        );
        self.sessions
            .activate(&request.community_id, &request.channel_id);
    }

    /// Applies a connectivity notification to the community's session.
    pub fn connectivity_changed(&self, change: &ConnectivityChange) {
        self.sessions
            .on_connectivity_change(&change.community_id, change.connected);
    }

    /// Stores a fact about a user. Blank facts are ignored.
    ///
    /// Returns whether the fact was new.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not persist the fact.
    pub async fn remember(&self, request: &RememberRequest) -> Result<bool, DispatchError> {
        let fact = request.fact.trim();
        if fact.is_empty() {
            trace!(user = %request.user_id, "ignoring blank fact");
            return Ok(false);
        }

        self.store
            .remember_fact(&request.community_id, &request.user_id, fact)
            .await
            .context(DispatchError::Remember {
                user_id: request.user_id.clone(),
            })
    }

    /// Answers a chat message if its channel is active.
    ///
    /// Both turns are recorded only after a non-empty reply was generated
    /// and the channel is still active.
    ///
    /// # Errors
    ///
    /// Returns an error if any step after the gate failed.
    #[instrument(
        skip(self, message),
        fields(community = %message.community_id, channel = %message.channel_id)
    )]
    pub async fn respond(
        &self,
        message: InboundMessage,
    ) -> Result<Option<Reply>, DispatchError> {
        if message.author_is_bot {
            return Ok(None);
        }
        let text = message.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if !self
            .sessions
            .is_allowed(&message.community_id, &message.channel_id)
        {
            trace!("channel not active");
            return Ok(None);
        }

        let _turn = self
            .turns
            .acquire(&message.community_id, &message.channel_id)
            .await;

        let history = self
            .store
            .recent_messages(
                &message.community_id,
                &message.channel_id,
                self.assistant.history_window,
            )
            .await
            .context(DispatchError::History {
                channel_id: message.channel_id.clone(),
            })?;
        let profile = self
            .store
            .profile_text(&message.community_id, &message.author_id)
            .await
            .context(DispatchError::History {
                channel_id: message.channel_id.clone(),
            })?;

        let context = ContextBuilder::new(&self.assistant.system_prompt)
            .with_speaker_profile(&profile)
            .with_history(&history)
            .build(&message.display_name, text);
        let request = LlmRequest::new(context.into_iter().map(to_llm_message).collect());

        let response = self
            .backend
            .generate(&request)
            .await
            .context(DispatchError::Generation {
                model: self.backend.model().to_string(),
            })?;
        if response.content.is_empty() {
            debug!("model returned an empty reply");
            return Ok(None);
        }

        if !self
            .sessions
            .is_allowed(&message.community_id, &message.channel_id)
        {
            info!("channel deactivated during generation; dropping reply");
            return Ok(None);
        }

        let mut user_turn = NewMessage::user(
            message.community_id.clone(),
            message.channel_id.clone(),
            message.author_id.clone(),
            message.display_name.clone(),
            text,
        );
        user_turn.timestamp = message.timestamp;
        self.store
            .add_message(user_turn)
            .await
            .context(DispatchError::Record {
                channel_id: message.channel_id.clone(),
            })?;
        self.store
            .add_message(NewMessage::assistant(
                message.community_id.clone(),
                message.channel_id.clone(),
                self.assistant.user_id.clone(),
                self.assistant.name.clone(),
                response.content.clone(),
            ))
            .await
            .context(DispatchError::Record {
                channel_id: message.channel_id.clone(),
            })?;

        debug!(
            tokens = response.usage.total(),
            model = %response.model,
            "reply generated"
        );
        Ok(Some(Reply {
            community_id: message.community_id,
            channel_id: message.channel_id,
            reply_to: message.message_id,
            text: response.content,
        }))
    }
}

fn to_llm_message(entry: ContextEntry) -> LlmMessage {
    match entry.role {
        ContextRole::System => LlmMessage::system(entry.content),
        ContextRole::User => LlmMessage::user(entry.content),
        ContextRole::Assistant => LlmMessage::assistant(entry.content),
    }
}
