//! Channel gating and conversation memory for kanna.
//!
//! This crate provides:
//!
//! - **Session Registry**: Which channel, if any, may receive replies per community
//! - **Conversation Store**: Bounded per-channel history and per-user facts
//! - **Document Repository**: Crash-safe persistence of the whole snapshot
//! - **Context Builder**: Role-tagged generation context from history

pub mod context;
pub mod document;
pub mod error;
mod lenient;
pub mod message;
pub mod repository;
pub mod session;
pub mod store;

pub use context::{ContextBuilder, ContextEntry, ContextRole};
pub use document::{ChannelLog, CommunityRecord, Document, UserProfile};
pub use error::StoreError;
pub use message::{Message, MessageRole, NewMessage};
pub use repository::{DocumentRepository, JsonFileRepository};
pub use session::{SessionRegistry, SessionState};
pub use store::{ConversationStore, DEFAULT_CHANNEL_LIMIT};
