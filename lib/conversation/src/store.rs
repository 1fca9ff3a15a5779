//! Bounded, durable conversation memory.
//!
//! The store owns the in-memory [`Document`] and persists the full snapshot
//! through a [`DocumentRepository`] on every change. The document sits behind
//! one async mutex that is held across load, mutation, trimming and
//! persistence, so a call is observably atomic to every other call.

use crate::document::Document;
use crate::error::StoreError;
use crate::message::{Message, NewMessage};
use crate::repository::{DocumentRepository, JsonFileRepository};
use chrono::{SubsecRound, Utc};
use kanna_core::{ChannelId, CommunityId, Result, UserId};
use tokio::sync::Mutex;
use tracing::{instrument, trace, warn};

/// Messages retained per channel unless configured otherwise.
pub const DEFAULT_CHANNEL_LIMIT: usize = 200;

/// Durable per-channel message logs and per-user fact profiles.
#[derive(Debug)]
pub struct ConversationStore<R = JsonFileRepository> {
    repository: R,
    channel_limit: usize,
    document: Mutex<Option<Document>>,
}

impl<R: DocumentRepository> ConversationStore<R> {
    /// Creates a store that keeps at most `channel_limit` messages per channel.
    ///
    /// A limit of zero is raised to one.
    #[must_use]
    pub fn new(repository: R, channel_limit: usize) -> Self {
        Self {
            repository,
            channel_limit: channel_limit.max(1),
            document: Mutex::new(None),
        }
    }

    /// Returns the per-channel message limit.
    #[must_use]
    pub fn channel_limit(&self) -> usize {
        self.channel_limit
    }

    /// Returns the underlying repository.
    #[must_use]
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Loads the stored document if it has not been loaded yet.
    ///
    /// A missing or unreadable document is replaced by an empty one, which is
    /// written out as the new baseline.
    ///
    /// # Errors
    ///
    /// Returns an error only if writing the empty baseline fails.
    pub async fn load(&self) -> Result<(), StoreError> {
        let mut slot = self.document.lock().await;
        self.loaded(&mut slot).await?;
        Ok(())
    }

    /// Appends a message to its channel log and records the author as seen.
    ///
    /// The log is trimmed from the front to the channel limit and the whole
    /// document is persisted before returning.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot could not be written. The
    /// in-memory change is kept in that case.
    #[instrument(
        skip(self, message),
        fields(community = %message.community_id, channel = %message.channel_id, role = ?message.role)
    )]
    pub async fn add_message(&self, message: NewMessage) -> Result<(), StoreError> {
        let mut slot = self.document.lock().await;
        let document = self.loaded(&mut slot).await?;

        let timestamp = message.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(3);
        document
            .user_mut(&message.community_id, &message.user_id, &message.display_name)
            .touch(timestamp);

        let evicted = document
            .channel_mut(&message.community_id, &message.channel_id)
            .push_bounded(
                Message {
                    user_id: message.user_id,
                    name: message.display_name,
                    role: message.role,
                    text: message.text,
                    timestamp,
                    extra: serde_json::Map::new(),
                },
                self.channel_limit,
            );
        if evicted > 0 {
            trace!(evicted, "trimmed channel log");
        }

        self.repository.save(document).await
    }

    /// Returns the last `limit` messages of a channel, oldest first.
    ///
    /// Unknown channels yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first load had to write a baseline and
    /// that write failed.
    pub async fn recent_messages(
        &self,
        community_id: &CommunityId,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let mut slot = self.document.lock().await;
        let document = self.loaded(&mut slot).await?;
        Ok(document
            .channel(community_id, channel_id)
            .map(|log| log.recent(limit))
            .unwrap_or_default())
    }

    /// Adds a fact to the user's profile unless the exact text is known.
    ///
    /// The document is persisted only when the fact was new. Returns whether
    /// it was.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot could not be written.
    #[instrument(skip(self, fact), fields(community = %community_id, user = %user_id))]
    pub async fn remember_fact(
        &self,
        community_id: &CommunityId,
        user_id: &UserId,
        fact: &str,
    ) -> Result<bool, StoreError> {
        let mut slot = self.document.lock().await;
        let document = self.loaded(&mut slot).await?;

        if !document.user_mut(community_id, user_id, "").remember(fact) {
            trace!("fact already known");
            return Ok(false);
        }

        self.repository.save(document).await?;
        Ok(true)
    }

    /// Renders the user's profile, or an empty string for unknown users.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first load had to write a baseline and
    /// that write failed.
    pub async fn profile_text(
        &self,
        community_id: &CommunityId,
        user_id: &UserId,
    ) -> Result<String, StoreError> {
        let mut slot = self.document.lock().await;
        let document = self.loaded(&mut slot).await?;
        Ok(document
            .user(community_id, user_id)
            .map(|profile| profile.to_text())
            .unwrap_or_default())
    }

    /// Returns a copy of the current in-memory document.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first load had to write a baseline and
    /// that write failed.
    pub async fn snapshot(&self) -> Result<Document, StoreError> {
        let mut slot = self.document.lock().await;
        Ok(self.loaded(&mut slot).await?.clone())
    }

    async fn loaded<'a>(
        &self,
        slot: &'a mut Option<Document>,
    ) -> Result<&'a mut Document, StoreError> {
        if slot.is_none() {
            let document = match self.repository.load().await {
                Ok(document) => document,
                Err(err) => {
                    warn!(error = %err, "starting from an empty conversation document");
                    let empty = Document::default();
                    self.repository.save(&empty).await?;
                    empty
                }
            };
            *slot = Some(document);
        }
        Ok(slot.get_or_insert_with(Document::default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageRole;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tempfile::TempDir;

    /// In-memory repository that counts saves and can be told to fail them.
    #[derive(Default)]
    struct MemoryRepository {
        stored: StdMutex<Option<Document>>,
        saves: AtomicUsize,
        fail_saves: AtomicBool,
    }

    impl MemoryRepository {
        fn with_document(document: Document) -> Self {
            Self {
                stored: StdMutex::new(Some(document)),
                ..Default::default()
            }
        }

        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        fn stored(&self) -> Option<Document> {
            self.stored.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentRepository for MemoryRepository {
        async fn load(&self) -> Result<Document, StoreError> {
            self.stored.lock().unwrap().clone().ok_or_else(|| {
                StoreError::NotFound {
                    path: "memory".to_string(),
                }
                .into()
            })
        }

        async fn save(&self, document: &Document) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::WriteFailed {
                    path: "memory".to_string(),
                    reason: "simulated failure".to_string(),
                }
                .into());
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.stored.lock().unwrap() = Some(document.clone());
            Ok(())
        }
    }

    fn g() -> CommunityId {
        CommunityId::from("g1")
    }

    fn c() -> ChannelId {
        ChannelId::from("c1")
    }

    fn user_msg(text: &str) -> NewMessage {
        NewMessage::user(g(), c(), UserId::from("u1"), "Alice", text)
    }

    fn texts(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.text.clone()).collect()
    }

    #[tokio::test]
    async fn load_writes_empty_baseline_when_missing() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);

        store.load().await.expect("load");
        store.load().await.expect("load again");

        assert_eq!(store.repository().saves(), 1);
        assert_eq!(store.repository().stored(), Some(Document::default()));
    }

    #[tokio::test]
    async fn load_replaces_malformed_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("memory.json");
        std::fs::write(&path, b"[1, 2, oops").expect("write");

        let store = ConversationStore::new(JsonFileRepository::new(&path), 10);
        store.load().await.expect("load");

        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{}");
        assert!(store.snapshot().await.expect("snapshot").is_empty());
    }

    #[tokio::test]
    async fn load_keeps_documents_with_foreign_values() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("memory.json");
        let original = r#"{"g1": {"channels": {"c1": {"messages": [
            {"userId": "u1", "name": "Alice", "role": "user", "text": "A", "ts": 1700000000000.5},
            {"userId": "u2", "name": null, "role": "user", "text": "B", "ts": 1700000000001},
            {"userId": "u3", "name": "Bot", "role": "system", "text": "C", "ts": 1700000000002}
        ]}}, "users": {"u1": {"name": "Alice", "facts": ["likes tea"], "lastSeen": 1700000000000.5}}}}"#;
        std::fs::write(&path, original).expect("write");

        let store = ConversationStore::new(JsonFileRepository::new(&path), 10);
        let recent = store.recent_messages(&g(), &c(), 10).await.expect("recent");

        assert_eq!(texts(&recent), vec!["A", "B", "C"]);
        assert_eq!(recent[0].timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(recent[1].name, "");
        assert_eq!(recent[2].role, MessageRole::User);
        assert_eq!(
            store.profile_text(&g(), &UserId::from("u1")).await.expect("profile"),
            "Name: Alice | Facts: likes tea"
        );
        assert_eq!(std::fs::read_to_string(&path).expect("read"), original);
    }

    #[tokio::test]
    async fn last_seen_keeps_the_newest_timestamp() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);
        let at = |ms| DateTime::from_timestamp_millis(ms).expect("valid ts");

        store.add_message(user_msg("late").at(at(2000))).await.expect("add");
        store.add_message(user_msg("early").at(at(1000))).await.expect("add");

        let snapshot = store.snapshot().await.expect("snapshot");
        let profile = snapshot.user(&g(), &UserId::from("u1")).expect("user");
        assert_eq!(profile.last_seen, at(2000));
    }

    #[tokio::test]
    async fn load_keeps_existing_document() {
        let mut document = Document::default();
        document
            .user_mut(&g(), &UserId::from("u1"), "Alice")
            .remember("likes tea");
        let store = ConversationStore::new(MemoryRepository::with_document(document.clone()), 10);

        assert_eq!(store.snapshot().await.expect("snapshot"), document);
        assert_eq!(store.repository().saves(), 0);
    }

    #[tokio::test]
    async fn channel_log_keeps_last_limit_messages() {
        let store = ConversationStore::new(MemoryRepository::default(), 3);

        for text in ["A", "B", "C", "D"] {
            store.add_message(user_msg(text)).await.expect("add");
        }

        let recent = store.recent_messages(&g(), &c(), 10).await.expect("recent");
        assert_eq!(texts(&recent), vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn overflow_keeps_newest_in_order() {
        let limit = 5;
        let store = ConversationStore::new(MemoryRepository::default(), limit);

        for i in 1..=12 {
            store.add_message(user_msg(&format!("m{i}"))).await.expect("add");
        }

        let recent = store.recent_messages(&g(), &c(), limit + 3).await.expect("recent");
        let expected: Vec<String> = (8..=12).map(|i| format!("m{i}")).collect();
        assert_eq!(texts(&recent), expected);

        let tail = store.recent_messages(&g(), &c(), 2).await.expect("recent");
        assert_eq!(texts(&tail), vec!["m11", "m12"]);
    }

    #[tokio::test]
    async fn unknown_channel_is_empty() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);

        let recent = store
            .recent_messages(&g(), &ChannelId::from("never"), 10)
            .await
            .expect("recent");
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn add_message_persists_and_tracks_user() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);
        let ts = DateTime::from_timestamp_millis(1_700_000_000_500).expect("valid ts");

        store.add_message(user_msg("hi").at(ts)).await.expect("add");
        store
            .add_message(
                NewMessage::user(g(), c(), UserId::from("u1"), "Ally", "renamed").at(ts),
            )
            .await
            .expect("add");

        let stored = store.repository().stored().expect("persisted");
        let profile = stored.user(&g(), &UserId::from("u1")).expect("profile");
        assert_eq!(profile.name, "Ally");
        assert_eq!(profile.last_seen, ts);
        assert_eq!(store.repository().saves(), 3);
    }

    #[tokio::test]
    async fn assistant_turns_are_recorded_with_role() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);

        store.add_message(user_msg("hello")).await.expect("add");
        store
            .add_message(NewMessage::assistant(g(), c(), UserId::from("bot"), "Kanna", "hi!"))
            .await
            .expect("add");

        let recent = store.recent_messages(&g(), &c(), 10).await.expect("recent");
        assert_eq!(recent[0].role, MessageRole::User);
        assert_eq!(recent[1].role, MessageRole::Assistant);
        assert_eq!(recent[1].name, "Kanna");
    }

    #[tokio::test]
    async fn remember_fact_dedups_and_saves_only_on_change() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);
        let u = UserId::from("u1");

        assert!(store.remember_fact(&g(), &u, "likes tea").await.expect("remember"));
        let saves = store.repository().saves();
        assert!(!store.remember_fact(&g(), &u, "likes tea").await.expect("remember"));

        assert_eq!(store.repository().saves(), saves);
        let snapshot = store.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.user(&g(), &u).expect("profile").facts.len(), 1);
    }

    #[tokio::test]
    async fn profile_text_renders_known_users() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);
        let u = UserId::from("u1");

        assert_eq!(store.profile_text(&g(), &u).await.expect("profile"), "");

        store.add_message(user_msg("hi")).await.expect("add");
        assert_eq!(store.profile_text(&g(), &u).await.expect("profile"), "Name: Alice");

        store.remember_fact(&g(), &u, "likes tea").await.expect("remember");
        store.remember_fact(&g(), &u, "plays go").await.expect("remember");
        assert_eq!(
            store.profile_text(&g(), &u).await.expect("profile"),
            "Name: Alice | Facts: likes tea; plays go"
        );
    }

    #[tokio::test]
    async fn write_failure_is_propagated() {
        let store = ConversationStore::new(MemoryRepository::default(), 10);
        store.load().await.expect("load");
        store.repository().fail_saves.store(true, Ordering::SeqCst);

        let err = store.add_message(user_msg("lost?")).await.unwrap_err();
        assert!(err.to_string().contains("simulated failure"));

        // Memory keeps the change even though disk does not have it.
        let recent = store.recent_messages(&g(), &c(), 10).await.expect("recent");
        assert_eq!(texts(&recent), vec!["lost?"]);
        assert_eq!(store.repository().stored(), Some(Document::default()));
    }

    #[tokio::test]
    async fn reload_is_field_for_field_identical() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("data").join("memory.json");

        let store = ConversationStore::new(JsonFileRepository::new(&path), 50);
        store.add_message(user_msg("hello")).await.expect("add");
        store
            .add_message(NewMessage::assistant(g(), c(), UserId::from("bot"), "Kanna", "hi!"))
            .await
            .expect("add");
        store
            .remember_fact(&g(), &UserId::from("u1"), "likes tea")
            .await
            .expect("remember");
        let before = store.snapshot().await.expect("snapshot");

        let reloaded = ConversationStore::new(JsonFileRepository::new(&path), 50);
        assert_eq!(reloaded.snapshot().await.expect("snapshot"), before);
    }

    #[tokio::test]
    async fn concurrent_appends_respect_limit() {
        let store = Arc::new(ConversationStore::new(MemoryRepository::default(), 4));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.add_message(user_msg(&format!("m{i}"))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("add");
        }

        let snapshot = store.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.channel(&g(), &c()).expect("log").len(), 4);
        let stored = store.repository().stored().expect("persisted");
        assert_eq!(stored.channel(&g(), &c()).expect("log").len(), 4);
    }
}
