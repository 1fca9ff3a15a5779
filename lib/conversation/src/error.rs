//! Error types for the conversation crate.
//!
//! Errors are raised as rootcause reports:
//! - `StoreError`: Errors from document storage and persistence

use std::fmt;

/// Errors from document storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No document exists at the storage location yet.
    NotFound { path: String },
    /// The stored document could not be read.
    ReadFailed { path: String, reason: String },
    /// The stored document is not a valid snapshot.
    Malformed { path: String, reason: String },
    /// The document could not be serialized.
    SerializeFailed { reason: String },
    /// Writing the snapshot failed; the previous snapshot is left in place.
    WriteFailed { path: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "no stored document at {path}"),
            Self::ReadFailed { path, reason } => {
                write!(f, "failed to read document {path}: {reason}")
            }
            Self::Malformed { path, reason } => {
                write!(f, "malformed document {path}: {reason}")
            }
            Self::SerializeFailed { reason } => {
                write!(f, "failed to serialize document: {reason}")
            }
            Self::WriteFailed { path, reason } => {
                write!(f, "failed to write document {path}: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}
