//! Error types for the AI crate.
//!
//! Errors are raised as rootcause reports:
//! - `LlmError`: Failures calling a text generation backend

use std::fmt;

/// Errors from LLM backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Request could not be sent or the connection failed.
    RequestFailed { reason: String },
    /// The backend answered with a non-success status.
    ApiError { status: u16, body: String },
    /// The backend rejected our credentials.
    Unauthorized { body: String },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Timeout waiting for response.
    Timeout,
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::ApiError { status, body } => {
                write!(f, "LLM API error {status}: {body}")
            }
            Self::Unauthorized { body } => {
                write!(f, "LLM API rejected credentials: {body}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid LLM configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}
