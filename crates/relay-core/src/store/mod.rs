//! Record-store contract consumed by the processing engine.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use memory::InMemoryStore;

use crate::{
    error::Result,
    models::{
        DownloadStatus, MetricsReport, NewWebhook, RecordFilter, RetryUpdate, WebhookId,
        WebhookRecord,
    },
};

/// CRUD and query operations over persisted webhook records.
///
/// All updates are atomic with respect to a single record. `find` reports a
/// missing id as `Ok(None)`; updates addressed at a missing id fail with
/// [`crate::StoreError::RecordMissing`]. Serializing concurrent updates to
/// the same id is the store's responsibility, not the engine's.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a new record. Status defaults to `Pending` when unset.
    async fn create(&self, new: NewWebhook) -> Result<WebhookRecord>;

    /// Looks up a record by id.
    async fn find(&self, id: WebhookId) -> Result<Option<WebhookRecord>>;

    /// Returns records matching the filter, newest first.
    async fn find_many(&self, filter: &RecordFilter) -> Result<Vec<WebhookRecord>>;

    /// Sets the download status, optionally replacing the error message.
    ///
    /// Passing `None` for `error_message` leaves the stored message as is.
    async fn update_status(
        &self,
        id: WebhookId,
        status: DownloadStatus,
        error_message: Option<String>,
    ) -> Result<WebhookRecord>;

    /// Attaches the storage key after a successful upload.
    async fn set_storage_key(&self, id: WebhookId, key: &str) -> Result<WebhookRecord>;

    /// Applies retry bookkeeping atomically.
    ///
    /// When the update transitions the record to `Failed`, the storage key is
    /// cleared so that a key is only ever present on downloaded records.
    async fn update_for_retry(&self, id: WebhookId, update: RetryUpdate) -> Result<WebhookRecord>;

    /// Aggregates per-status totals and a per-day breakdown over an optional
    /// `created_at` window.
    async fn metrics(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<MetricsReport>;

    /// Returns records for timeline views, newest first.
    async fn timeline(&self, filter: &RecordFilter) -> Result<Vec<WebhookRecord>>;
}
