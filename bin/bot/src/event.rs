//! Events exchanged with the chat gateway.
//!
//! Inbound events arrive as JSON objects tagged by `type`; outbound replies
//! are written the same way.

use chrono::{DateTime, Utc};
use kanna_core::{ChannelId, CommunityId, UserId};
use serde::{Deserialize, Serialize};

/// An event handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    /// A chat message was posted.
    Message(InboundMessage),
    /// Someone asked the bot to talk in a channel.
    Activate(ActivationRequest),
    /// The bot's connection to a community changed.
    Connectivity(ConnectivityChange),
    /// Someone asked the bot to remember a fact about a user.
    Remember(RememberRequest),
}

/// A chat message posted in a community channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub community_id: CommunityId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub display_name: String,
    pub text: String,
    /// When the message was posted, in milliseconds since the epoch.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Gateway message id, echoed back on the reply.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Messages from bots (including ourselves) are never answered.
    #[serde(default)]
    pub author_is_bot: bool,
}

/// Request to make a channel the community's active channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub community_id: CommunityId,
    pub channel_id: ChannelId,
    pub requesting_user_id: UserId,
}

/// Notification that the bot's presence in a community changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityChange {
    pub community_id: CommunityId,
    pub connected: bool,
}

/// Request to remember a fact about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberRequest {
    pub community_id: CommunityId,
    pub user_id: UserId,
    pub fact: String,
}

/// Output sent back to the chat gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotOutput {
    Reply(Reply),
}

/// A generated reply to post in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub community_id: CommunityId,
    pub channel_id: ChannelId,
    /// Gateway id of the message being answered, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_event() {
        let event: BotEvent = serde_json::from_str(
            r#"{"type":"message","communityId":"g1","channelId":"c1","authorId":"u1",
                "displayName":"Alice","text":"hi","timestamp":1700000000000,"messageId":"m9"}"#,
        )
        .expect("deserialize");

        let BotEvent::Message(message) = event else {
            panic!("expected message event");
        };
        assert_eq!(message.community_id, CommunityId::from("g1"));
        assert_eq!(message.message_id.as_deref(), Some("m9"));
        assert_eq!(
            message.timestamp.map(|ts| ts.timestamp_millis()),
            Some(1_700_000_000_000)
        );
        assert!(!message.author_is_bot);
    }

    #[test]
    fn parses_control_events() {
        let activate: BotEvent = serde_json::from_str(
            r#"{"type":"activate","communityId":"g1","channelId":"c1","requestingUserId":"u1"}"#,
        )
        .expect("deserialize");
        assert!(matches!(activate, BotEvent::Activate(_)));

        let connectivity: BotEvent =
            serde_json::from_str(r#"{"type":"connectivity","communityId":"g1","connected":false}"#)
                .expect("deserialize");
        assert_eq!(
            connectivity,
            BotEvent::Connectivity(ConnectivityChange {
                community_id: CommunityId::from("g1"),
                connected: false,
            })
        );
    }

    #[test]
    fn reply_serializes_tagged() {
        let output = BotOutput::Reply(Reply {
            community_id: CommunityId::from("g1"),
            channel_id: ChannelId::from("c1"),
            reply_to: None,
            text: "hello".to_string(),
        });

        assert_eq!(
            serde_json::to_value(&output).expect("serialize"),
            serde_json::json!({"type": "reply", "communityId": "g1", "channelId": "c1", "text": "hello"})
        );
    }
}
