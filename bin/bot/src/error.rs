//! Error types for the dispatch shell.
//!
//! `DispatchError` names the step of event handling that failed. It is
//! attached as context on top of the lower-level report. `DriverError`
//! covers the event stream itself.

use kanna_core::{ChannelId, UserId};
use std::fmt;

/// Errors from handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Reading conversation history failed.
    History { channel_id: ChannelId },
    /// The text generation call failed.
    Generation { model: String },
    /// Recording the exchange failed; no reply is sent.
    Record { channel_id: ChannelId },
    /// Storing a remembered fact failed.
    Remember { user_id: UserId },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::History { channel_id } => {
                write!(f, "failed to read history for channel {channel_id}")
            }
            Self::Generation { model } => {
                write!(f, "reply generation with model '{model}' failed")
            }
            Self::Record { channel_id } => {
                write!(f, "failed to record exchange in channel {channel_id}")
            }
            Self::Remember { user_id } => {
                write!(f, "failed to remember fact for user {user_id}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Errors from the event stream driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Reading the event stream failed.
    ReadFailed { reason: String },
    /// Writing a reply line failed.
    WriteFailed { reason: String },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed { reason } => write!(f, "failed to read events: {reason}"),
            Self::WriteFailed { reason } => write!(f, "failed to write reply: {reason}"),
        }
    }
}

impl std::error::Error for DriverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_display() {
        let err = DispatchError::Record {
            channel_id: ChannelId::from("c1"),
        };
        assert_eq!(err.to_string(), "failed to record exchange in channel c1");
    }
}
