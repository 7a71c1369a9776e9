//! Error types for the file-acquisition pipeline.
//!
//! Failures during an automatic processing cycle are caught at the engine
//! boundary and converted into retry bookkeeping; they never reach the
//! caller that created the record. Failures during manual actions and
//! queries propagate to the HTTP boundary for translation.

use thiserror::Error;

use relay_core::{StoreError, WebhookId};

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy of the processing pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Remote file could not be retrieved or written to scratch storage.
    #[error("failed to fetch {url}: {message}")]
    Fetch {
        /// Upstream file URL
        url: String,
        /// Underlying cause
        message: String,
    },

    /// Object storage rejected the upload or signing request.
    #[error("blob store operation failed for {key}: {message}")]
    Store {
        /// Storage key involved
        key: String,
        /// Underlying cause
        message: String,
    },

    /// Orchestrator trigger was rejected.
    #[error("orchestrator trigger failed: {body}")]
    Notify {
        /// HTTP status returned, when the request got that far
        status: Option<u16>,
        /// Upstream response body or transport error
        body: String,
    },

    /// Referenced webhook record does not exist.
    #[error("webhook {id} not found")]
    NotFound {
        /// Missing record identifier
        id: WebhookId,
    },

    /// Action invoked in an invalid record state.
    #[error("{message}")]
    Precondition {
        /// Human-readable precondition description
        message: String,
    },

    /// Unexpected internal failure, including store backend errors.
    #[error("internal pipeline error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl PipelineError {
    /// Creates a fetch error for a URL.
    pub fn fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch { url: url.into(), message: message.into() }
    }

    /// Creates a blob-store error for a key.
    pub fn store(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store { key: key.into(), message: message.into() }
    }

    /// Creates a notifier error carrying the upstream response body.
    pub fn notify(status: Option<u16>, body: impl Into<String>) -> Self {
        Self::Notify { status, body: body.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(id: WebhookId) -> Self {
        Self::NotFound { id }
    }

    /// Creates a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// True for failures the retry state machine may recover from.
    ///
    /// Fetch, store, and notify failures are transient by assumption; record
    /// absence and precondition failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Store { .. } | Self::Notify { .. })
    }
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::RecordMissing { id } => Self::NotFound { id },
            StoreError::Backend { message } => Self::Internal { message },
        }
    }
}
