//! Core domain types for the Sintegre webhook relay.
//!
//! Defines the webhook record model, its download-status state machine, and
//! the record-store contract the processing engine runs against. The shipped
//! store is in-memory; a database-backed store plugs in behind the same
//! trait without touching the engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    DailyCounts, DownloadStatus, MetricsReport, NewWebhook, RecordFilter, RetryUpdate,
    StatusCounts, WebhookId, WebhookRecord,
};
pub use store::{InMemoryStore, RecordStore};
