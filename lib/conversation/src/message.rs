//! Message types for channel conversation logs.

use crate::lenient;
use chrono::{DateTime, Utc};
use kanna_core::{ChannelId, CommunityId, UserId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

/// The role of a message sender.
///
/// Anything other than `"assistant"` decodes as [`MessageRole::User`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// A human in the channel.
    #[default]
    User,
    /// The bot's own generated reply.
    Assistant,
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let role = Option::<JsonValue>::deserialize(deserializer)?;
        Ok(match role.as_ref().and_then(JsonValue::as_str) {
            Some("assistant") => Self::Assistant,
            _ => Self::User,
        })
    }
}

/// A message stored in a channel's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    #[serde(rename = "userId")]
    pub user_id: UserId,
    /// Author's display name at the time the message was recorded.
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub name: String,
    /// Message role.
    #[serde(default)]
    pub role: MessageRole,
    /// Message text.
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub text: String,
    /// When the message was recorded, in milliseconds since the epoch.
    #[serde(rename = "ts", with = "lenient::millis", default = "crate::document::epoch")]
    pub timestamp: DateTime<Utc>,
    /// Fields written by other versions, preserved on save.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Message {
    /// Returns true if this message was generated by the assistant.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }
}

/// A message to append to a channel's conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Community the channel belongs to.
    pub community_id: CommunityId,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// Author of the message.
    pub user_id: UserId,
    /// Author's display name.
    pub display_name: String,
    /// Message role.
    pub role: MessageRole,
    /// Message text.
    pub text: String,
    /// Explicit timestamp; the current time is used when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Creates a new message.
    #[must_use]
    pub fn new(
        community_id: CommunityId,
        channel_id: ChannelId,
        user_id: UserId,
        display_name: impl Into<String>,
        role: MessageRole,
        text: impl Into<String>,
    ) -> Self {
        Self {
            community_id,
            channel_id,
            user_id,
            display_name: display_name.into(),
            role,
            text: text.into(),
            timestamp: None,
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(
        community_id: CommunityId,
        channel_id: ChannelId,
        user_id: UserId,
        display_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            community_id,
            channel_id,
            user_id,
            display_name,
            MessageRole::User,
            text,
        )
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(
        community_id: CommunityId,
        channel_id: ChannelId,
        user_id: UserId,
        display_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            community_id,
            channel_id,
            user_id,
            display_name,
            MessageRole::Assistant,
            text,
        )
    }

    /// Sets an explicit timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
