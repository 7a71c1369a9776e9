//! Asynchronous file-acquisition pipeline for Sintegre webhook records.
//!
//! This crate owns the per-webhook state machine: download the referenced
//! report file, upload it to object storage, trigger the downstream Airflow
//! run, and recover from transient failures via bounded, scheduled retries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   fetch    ┌──────────────┐   upload   ┌───────────┐
//! │ ProcessingEngine │───────────▶│ FileFetcher  │───────────▶│ BlobStore │
//! └──────────────────┘            └──────────────┘            └───────────┘
//!        │          │                                               │
//!        ▼          └───── notify ──────▶ ┌──────────┐              ▼
//! ┌─────────────┐                         │ Notifier │        ┌───────────┐
//! │ RecordStore │◀── status/retry ────────┴──────────┘        │    S3     │
//! └─────────────┘                                             └───────────┘
//! ```
//!
//! Processing cycles are launched fire-and-forget from intake, manual retry,
//! or a deferred timer; they never block the caller. Each collaborator is a
//! trait so tests can substitute in-memory doubles or wiremock-backed
//! implementations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod notify;
pub mod retry;
pub mod sanitize;
pub mod scheduler;

pub use blob::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use engine::{ProcessingEngine, Timeline, TimelineGroup};
pub use error::{PipelineError, Result};
pub use fetch::{FetchedFile, FileFetcher, HttpFileFetcher};
pub use notify::{AirflowNotifier, DagRunRequest, Notifier, NotifierConfig};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{ManualScheduler, RetryScheduler, Task, TokioScheduler};

/// Default lifetime of signed download URLs, in seconds.
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
