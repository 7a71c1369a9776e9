//! Webhook record model and strongly-typed identifiers.
//!
//! A [`WebhookRecord`] is the unit of work: one inbound Sintegre notification
//! and its file-processing lifecycle. Records are created `PENDING`, mutated
//! exclusively by the processing engine and the manual retry/reprocess
//! operations, and never deleted by this subsystem.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed webhook record identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Assigned at creation
/// and immutable for the life of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Download lifecycle state of a webhook record.
///
/// Transitions are `Pending → {Success|Failed} → Processed`. `Processed` is
/// terminal and reached only after the orchestrator run was triggered.
/// `Failed` is retryable up to the configured bound; a manual retry resets
/// the record back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    /// Awaiting or undergoing file processing.
    Pending,
    /// File fetched and uploaded; orchestrator not yet notified.
    Success,
    /// Last processing attempt failed.
    Failed,
    /// Uploaded and the orchestrator run was triggered.
    Processed,
}

impl DownloadStatus {
    /// True once the file has been durably stored (`Success` or `Processed`).
    pub fn is_downloaded(self) -> bool {
        matches!(self, Self::Success | Self::Processed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Processed => "PROCESSED",
        };
        write!(f, "{s}")
    }
}

/// Persisted webhook record.
///
/// Wire names follow the upstream Sintegre payload (`macroProcesso`,
/// `dataProduto`, ...). The `generation` counter guards against a scheduled
/// automatic retry racing a manual retry: cycles capture it at start and
/// abort quietly once superseded. It is bookkeeping, not part of the wire
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    /// Unique identifier, immutable.
    pub id: WebhookId,

    /// Product/report name; storage-path segment and notifier routing key.
    pub nome: String,

    /// Originating process, forwarded unchanged to the orchestrator.
    pub processo: String,

    /// Product date metadata, opaque to the pipeline.
    pub data_produto: String,

    /// Macro-process metadata, opaque to the pipeline.
    pub macro_processo: String,

    /// Reporting-period start.
    pub periodicidade: DateTime<Utc>,

    /// Reporting-period end.
    pub periodicidade_final: DateTime<Utc>,

    /// Source location of the file to fetch.
    pub url: String,

    /// Current download lifecycle state.
    pub download_status: DownloadStatus,

    /// Storage key once the file has been uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,

    /// Last failure description; cleared on manual retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Failed automatic attempts since the last reset.
    pub retry_count: u32,

    /// One timestamp per failed attempt; emptied on manual retry.
    pub retry_history: Vec<DateTime<Utc>>,

    /// Scheduled time of the next automatic retry, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Supersession counter, bumped by manual retry.
    #[serde(default, skip_serializing)]
    pub generation: u64,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Touched on every mutation.
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted at intake to create a webhook record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWebhook {
    /// Product/report name.
    pub nome: String,
    /// Originating process.
    pub processo: String,
    /// Product date metadata.
    pub data_produto: String,
    /// Macro-process metadata.
    pub macro_processo: String,
    /// Reporting-period start (ISO-8601).
    pub periodicidade: DateTime<Utc>,
    /// Reporting-period end (ISO-8601).
    pub periodicidade_final: DateTime<Utc>,
    /// Source location of the file to fetch.
    pub url: String,
    /// Initial status; defaults to `Pending`.
    #[serde(default)]
    pub download_status: Option<DownloadStatus>,
}

/// Filter for record queries. All fields optional; dates apply to
/// `created_at`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Inclusive lower bound on `created_at`.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub end_date: Option<DateTime<Utc>>,
    /// Restrict to a single download status.
    pub status: Option<DownloadStatus>,
    /// Restrict to a single product name.
    pub nome: Option<String>,
}

impl RecordFilter {
    /// True when the record matches every set field of the filter.
    pub fn matches(&self, record: &WebhookRecord) -> bool {
        if let Some(start) = self.start_date {
            if record.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if record.created_at > end {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.download_status != status {
                return false;
            }
        }
        if let Some(nome) = &self.nome {
            if &record.nome != nome {
                return false;
            }
        }
        true
    }
}

/// Per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// All records counted.
    pub total: u64,
    /// Records in `PENDING`.
    pub pending: u64,
    /// Records in `SUCCESS`.
    pub success: u64,
    /// Records in `FAILED`.
    pub failed: u64,
    /// Records in `PROCESSED`.
    pub processed: u64,
}

impl StatusCounts {
    /// Counts one record with the given status.
    pub fn record(&mut self, status: DownloadStatus) {
        self.total += 1;
        match status {
            DownloadStatus::Pending => self.pending += 1,
            DownloadStatus::Success => self.success += 1,
            DownloadStatus::Failed => self.failed += 1,
            DownloadStatus::Processed => self.processed += 1,
        }
    }
}

/// Counts for a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounts {
    /// UTC calendar day.
    pub date: NaiveDate,
    /// Counts for that day.
    #[serde(flatten)]
    pub counts: StatusCounts,
}

/// Aggregate metrics over an optional date window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Totals over the whole window.
    pub total: StatusCounts,
    /// Per-day breakdown, ascending by date.
    pub daily: Vec<DailyCounts>,
}

/// Atomic retry-bookkeeping update applied to one record.
///
/// Used both by automatic failure handling (status `Failed`, counters
/// advanced) and by manual retry (counters reset, generation bumped).
#[derive(Debug, Clone)]
pub struct RetryUpdate {
    /// New failed-attempt count.
    pub retry_count: u32,
    /// Full replacement retry history.
    pub retry_history: Vec<DateTime<Utc>>,
    /// Next scheduled automatic retry, or none.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Failure description, or none to clear.
    pub error_message: Option<String>,
    /// New status, when the update also transitions state.
    pub download_status: Option<DownloadStatus>,
    /// Bump the generation counter, superseding in-flight cycles.
    pub bump_generation: bool,
}
