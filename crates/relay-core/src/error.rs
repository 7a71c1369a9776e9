//! Error types for record-store operations.

use thiserror::Error;

use crate::models::WebhookId;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by record-store implementations.
///
/// `find` reports absence as `Ok(None)`; `RecordMissing` is reserved for
/// updates addressed at an id that does not exist.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// An update referenced a record that does not exist.
    #[error("webhook record {id} not found")]
    RecordMissing {
        /// Identifier the update was addressed to
        id: WebhookId,
    },

    /// The storage backend rejected or failed the operation.
    #[error("record store backend error: {message}")]
    Backend {
        /// Backend error message
        message: String,
    },
}

impl StoreError {
    /// Creates a missing-record error.
    pub fn missing(id: WebhookId) -> Self {
        Self::RecordMissing { id }
    }

    /// Creates a backend error from a message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }
}
