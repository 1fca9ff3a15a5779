//! Text generation for kanna.
//!
//! - **Backend**: The `LlmBackend` trait and chat request/response types
//! - **OpenRouter**: A chat completions client for OpenRouter-compatible gateways

pub mod backend;
pub mod error;
pub mod openrouter;

pub use backend::{LlmBackend, LlmMessage, LlmRequest, LlmResponse, MessageRole, TokenUsage};
pub use error::LlmError;
pub use openrouter::{OpenRouterBackend, OpenRouterConfig};
