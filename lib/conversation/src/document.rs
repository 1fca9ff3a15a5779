//! The persisted document schema.
//!
//! The whole datastore is one snapshot keyed by community:
//!
//! ```json
//! {
//!   "<communityId>": {
//!     "channels": { "<channelId>": { "messages": [ ... ] } },
//!     "users": { "<userId>": { "name": "...", "facts": [], "lastSeen": 0 } }
//!   }
//! }
//! ```
//!
//! The schema is additive-only. Fields this version does not know about are
//! kept in `extra` maps and written back unchanged.

use crate::lenient;
use crate::message::Message;
use chrono::{DateTime, Utc};
use kanna_core::{ChannelId, CommunityId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, VecDeque};

pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Full persisted snapshot of all communities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    communities: BTreeMap<CommunityId, CommunityRecord>,
}

impl Document {
    /// Returns true if no community has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Returns a community's record, if it exists.
    #[must_use]
    pub fn community(&self, community_id: &CommunityId) -> Option<&CommunityRecord> {
        self.communities.get(community_id)
    }

    /// Returns a community's record, creating it on first use.
    pub fn community_mut(&mut self, community_id: &CommunityId) -> &mut CommunityRecord {
        self.communities.entry(community_id.clone()).or_default()
    }

    /// Returns a channel's log, if it exists.
    #[must_use]
    pub fn channel(
        &self,
        community_id: &CommunityId,
        channel_id: &ChannelId,
    ) -> Option<&ChannelLog> {
        self.community(community_id)?.channels.get(channel_id)
    }

    /// Returns a channel's log, creating the community and channel on first use.
    pub fn channel_mut(
        &mut self,
        community_id: &CommunityId,
        channel_id: &ChannelId,
    ) -> &mut ChannelLog {
        self.community_mut(community_id)
            .channels
            .entry(channel_id.clone())
            .or_default()
    }

    /// Returns a user's profile, if it exists.
    #[must_use]
    pub fn user(&self, community_id: &CommunityId, user_id: &UserId) -> Option<&UserProfile> {
        self.community(community_id)?.users.get(user_id)
    }

    /// Returns a user's profile, creating it on first use.
    ///
    /// A non-empty `name` that differs from the stored one replaces it.
    pub fn user_mut(
        &mut self,
        community_id: &CommunityId,
        user_id: &UserId,
        name: &str,
    ) -> &mut UserProfile {
        let profile = self
            .community_mut(community_id)
            .users
            .entry(user_id.clone())
            .or_insert_with(|| UserProfile::named(name));
        if !name.is_empty() && profile.name != name {
            profile.name = name.to_string();
        }
        profile
    }
}

/// Everything recorded for one community.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityRecord {
    /// Conversation logs by channel.
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub channels: BTreeMap<ChannelId, ChannelLog>,
    /// User profiles by user.
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub users: BTreeMap<UserId, UserProfile>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A channel's bounded conversation log, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelLog {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub messages: VecDeque<Message>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ChannelLog {
    /// Appends a message, then evicts from the front until `len <= limit`.
    ///
    /// Returns the number of evicted messages.
    pub fn push_bounded(&mut self, message: Message, limit: usize) -> usize {
        self.messages.push_back(message);
        let excess = self.messages.len().saturating_sub(limit);
        self.messages.drain(..excess);
        excess
    }

    /// Returns the last `limit` messages in chronological order.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Returns the number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if no messages are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// What the bot remembers about a user within a community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub name: String,
    /// Remembered facts in insertion order, without duplicates.
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub facts: Vec<String>,
    #[serde(rename = "lastSeen", with = "lenient::millis", default = "epoch")]
    pub last_seen: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::named("")
    }
}

impl UserProfile {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            facts: Vec::new(),
            last_seen: epoch(),
            extra: Map::new(),
        }
    }

    /// Records that the user was seen at `timestamp`.
    ///
    /// `last_seen` never moves backwards.
    pub fn touch(&mut self, timestamp: DateTime<Utc>) {
        self.last_seen = self.last_seen.max(timestamp);
    }

    /// Adds a fact unless the exact text is already known.
    ///
    /// Returns true if the fact was added.
    pub fn remember(&mut self, fact: &str) -> bool {
        if self.facts.iter().any(|known| known == fact) {
            return false;
        }
        self.facts.push(fact.to_string());
        true
    }

    /// Renders the profile as `Name: <name> | Facts: <f1>; <f2>`.
    ///
    /// Empty parts are omitted.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut parts = Vec::with_capacity(2);
        if !self.name.is_empty() {
            parts.push(format!("Name: {}", self.name));
        }
        if !self.facts.is_empty() {
            parts.push(format!("Facts: {}", self.facts.join("; ")));
        }
        parts.join(" | ")
    }
}
