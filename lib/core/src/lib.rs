//! Core domain types and utilities for the kanna chat bot.
//!
//! This crate provides the identifier types and error handling shared by
//! the conversation, AI and bot crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ChannelId, CommunityId, ParseIdError, UserId};
