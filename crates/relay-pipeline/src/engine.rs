//! Processing engine: the per-webhook state machine.
//!
//! Intake persists a record and launches a fire-and-forget processing cycle:
//! fetch the file, upload it to blob storage, trigger the orchestrator run.
//! Any transient failure lands in retry bookkeeping, and a bounded number of
//! automatic retries is scheduled through the [`RetryScheduler`]. Manual
//! retry resets the bookkeeping and bumps the record's generation counter,
//! which quietly aborts any cycle still in flight for the old generation.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use relay_core::{
    DownloadStatus, MetricsReport, NewWebhook, RecordFilter, RecordStore, RetryUpdate, WebhookId,
    WebhookRecord,
};

use crate::{
    blob::BlobStore,
    error::{PipelineError, Result},
    fetch::{FetchedFile, FileFetcher},
    notify::{DagRunRequest, Notifier},
    retry::{RetryDecision, RetryPolicy},
    sanitize::clean_file_name,
    scheduler::RetryScheduler,
    DEFAULT_SIGNED_URL_TTL_SECS,
};

/// Records grouped by product name for timeline views.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    /// One group per product name, ordered by name.
    pub groups: Vec<TimelineGroup>,
}

/// All records of one product, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineGroup {
    /// Product name.
    pub nome: String,
    /// Acquisition events for this product, newest first.
    pub events: Vec<WebhookRecord>,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn FileFetcher>,
    blob: Arc<dyn BlobStore>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<dyn RetryScheduler>,
    policy: RetryPolicy,
}

/// Orchestrates webhook record processing end to end.
///
/// Cheap to clone; all collaborators sit behind an `Arc`.
#[derive(Clone)]
pub struct ProcessingEngine {
    inner: Arc<Inner>,
}

impl ProcessingEngine {
    /// Wires the engine to its collaborators.
    pub fn new(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn FileFetcher>,
        blob: Arc<dyn BlobStore>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<dyn RetryScheduler>,
        policy: RetryPolicy,
    ) -> Self {
        Self { inner: Arc::new(Inner { store, fetcher, blob, notifier, scheduler, policy }) }
    }

    /// Persists an inbound webhook and launches its first processing cycle.
    ///
    /// Returns as soon as the record is stored; the cycle runs in the
    /// background and never fails the intake request.
    pub async fn create(&self, new: NewWebhook) -> Result<WebhookRecord> {
        let record = self.inner.store.create(new).await?;
        info!(webhook_id = %record.id, nome = %record.nome, "webhook record created");

        self.launch_cycle(record.id, record.generation, Duration::ZERO);
        Ok(record)
    }

    /// Looks up one record.
    pub async fn find_one(&self, id: WebhookId) -> Result<WebhookRecord> {
        self.inner.store.find(id).await?.ok_or_else(|| PipelineError::not_found(id))
    }

    /// Returns records matching the filter, newest first.
    pub async fn find_all(&self, filter: &RecordFilter) -> Result<Vec<WebhookRecord>> {
        Ok(self.inner.store.find_many(filter).await?)
    }

    /// Aggregated per-status and per-day counts over an optional window.
    pub async fn metrics(
        &self,
        start_date: Option<chrono::DateTime<Utc>>,
        end_date: Option<chrono::DateTime<Utc>>,
    ) -> Result<MetricsReport> {
        Ok(self.inner.store.metrics(start_date, end_date).await?)
    }

    /// Timeline view: matching records grouped by product name.
    pub async fn timeline(&self, filter: &RecordFilter) -> Result<Timeline> {
        let records = self.inner.store.timeline(filter).await?;

        let mut by_nome: BTreeMap<String, Vec<WebhookRecord>> = BTreeMap::new();
        for record in records {
            by_nome.entry(record.nome.clone()).or_default().push(record);
        }

        let groups = by_nome
            .into_iter()
            .map(|(nome, events)| TimelineGroup { nome, events })
            .collect();
        Ok(Timeline { groups })
    }

    /// Signs a fresh download URL for a record's stored file.
    ///
    /// A record without a downloaded file has nothing addressable, so it is
    /// reported as not found rather than as an invalid state.
    pub async fn download_url(&self, id: WebhookId) -> Result<String> {
        let record = self.find_one(id).await?;
        if !record.download_status.is_downloaded() {
            return Err(PipelineError::not_found(id));
        }
        let key = record.s3_key.ok_or_else(|| PipelineError::not_found(id))?;

        self.inner
            .blob
            .signed_url(&key, Duration::from_secs(DEFAULT_SIGNED_URL_TTL_SECS))
            .await
    }

    /// Manual retry: resets retry bookkeeping and relaunches processing.
    ///
    /// Bumping the generation counter supersedes any automatic retry still
    /// scheduled for the previous failure, so the two can never both mutate
    /// the record.
    pub async fn retry_download(&self, id: WebhookId) -> Result<WebhookRecord> {
        let record = self.find_one(id).await?;
        if record.download_status.is_downloaded() {
            return Err(PipelineError::precondition(format!(
                "webhook {id} is already downloaded ({})",
                record.download_status
            )));
        }
        if record.url.is_empty() {
            return Err(PipelineError::precondition(format!(
                "webhook {id} has no source URL to retry"
            )));
        }

        let update = RetryUpdate {
            retry_count: 0,
            retry_history: Vec::new(),
            next_retry_at: None,
            error_message: None,
            download_status: Some(DownloadStatus::Pending),
            bump_generation: true,
        };
        let updated = self.inner.store.update_for_retry(id, update).await?;
        info!(webhook_id = %id, "manual retry requested, relaunching processing");

        self.launch_cycle(updated.id, updated.generation, Duration::ZERO);
        Ok(updated)
    }

    /// Re-triggers the orchestrator run for an already-stored file.
    ///
    /// No download happens; the record must carry a storage key.
    pub async fn reprocess(&self, id: WebhookId) -> Result<WebhookRecord> {
        let record = self.find_one(id).await?;
        if !record.download_status.is_downloaded() {
            return Err(PipelineError::precondition(format!(
                "webhook {id} is not downloaded yet ({})",
                record.download_status
            )));
        }
        let key = record.s3_key.clone().ok_or_else(|| {
            PipelineError::precondition(format!("webhook {id} has no stored file to reprocess"))
        })?;

        let run = dag_run_request(&record, &key);
        self.inner.notifier.trigger(&run, &record.nome).await?;

        let updated =
            self.inner.store.update_status(id, DownloadStatus::Processed, None).await?;
        info!(webhook_id = %id, nome = %updated.nome, "orchestrator re-triggered");
        Ok(updated)
    }

    /// Queues one processing cycle through the scheduler.
    fn launch_cycle(&self, id: WebhookId, generation: u64, delay: Duration) {
        let engine = self.clone();
        self.inner.scheduler.schedule(
            delay,
            Box::pin(async move {
                engine.run_cycle(id, generation).await;
            }),
        );
    }

    /// One processing cycle. Never returns an error: failures feed the retry
    /// state machine instead.
    async fn run_cycle(&self, id: WebhookId, generation: u64) {
        let record = match self.inner.store.find(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(webhook_id = %id, "processing cycle for a record that no longer exists");
                return;
            },
            Err(e) => {
                error!(webhook_id = %id, error = %e, "failed to load record for processing");
                return;
            },
        };

        if record.generation != generation {
            debug!(webhook_id = %id, "processing cycle superseded by manual retry, aborting");
            return;
        }

        if let Err(e) = self.process(&record).await {
            self.handle_failure(id, generation, e).await;
        }
    }

    async fn process(&self, record: &WebhookRecord) -> Result<()> {
        let fetched = self.inner.fetcher.fetch(&record.url).await?;
        let result = self.finish_cycle(record, &fetched).await;

        // Scratch cleanup is best effort.
        if let Err(e) = tokio::fs::remove_file(&fetched.local_path).await {
            warn!(
                path = %fetched.local_path.display(),
                error = %e,
                "failed to remove scratch file"
            );
        }

        result
    }

    /// Uploads the fetched file and triggers the orchestrator.
    async fn finish_cycle(&self, record: &WebhookRecord, fetched: &FetchedFile) -> Result<()> {
        let file_name = clean_file_name(&fetched.file_name);
        let key = format!("webhooks/{}/{}_{}", record.nome, record.id, file_name);

        let metadata = HashMap::from([("webhook-id".to_string(), record.id.to_string())]);
        let stored_key =
            self.inner.blob.upload(&fetched.local_path, &key, Some(metadata)).await?;

        // The upload may have raced a manual retry; only the owning cycle
        // gets to mutate the record.
        if !self.owns_generation(record.id, record.generation).await? {
            debug!(webhook_id = %record.id, "cycle superseded after upload, leaving record alone");
            return Ok(());
        }

        self.inner.store.update_status(record.id, DownloadStatus::Success, None).await?;
        let updated = self.inner.store.set_storage_key(record.id, &stored_key).await?;
        info!(webhook_id = %record.id, key = %stored_key, "file uploaded to blob storage");

        let run = dag_run_request(&updated, &stored_key);
        self.inner.notifier.trigger(&run, &updated.nome).await?;

        // Same race window exists while the notification is in flight.
        if !self.owns_generation(record.id, record.generation).await? {
            debug!(webhook_id = %record.id, "cycle superseded after notification, leaving record alone");
            return Ok(());
        }

        self.inner.store.update_status(record.id, DownloadStatus::Processed, None).await?;
        info!(webhook_id = %record.id, nome = %updated.nome, "webhook fully processed");
        Ok(())
    }

    /// Records a failed cycle and schedules the next automatic retry, if any
    /// attempts remain.
    async fn handle_failure(&self, id: WebhookId, generation: u64, cause: PipelineError) {
        warn!(webhook_id = %id, error = %cause, "processing cycle failed");

        let record = match self.inner.store.find(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                error!(webhook_id = %id, error = %e, "failed to load record after failure");
                return;
            },
        };
        if record.generation != generation {
            debug!(webhook_id = %id, "failed cycle was already superseded, dropping");
            return;
        }

        let now = Utc::now();
        let mut history = record.retry_history.clone();
        history.push(now);

        let (update, reschedule) = match self.inner.policy.decide(record.retry_count, now) {
            RetryDecision::Retry { next_attempt_at } => (
                RetryUpdate {
                    retry_count: record.retry_count + 1,
                    retry_history: history,
                    next_retry_at: Some(next_attempt_at),
                    error_message: Some(cause.to_string()),
                    download_status: Some(DownloadStatus::Failed),
                    bump_generation: false,
                },
                true,
            ),
            RetryDecision::GiveUp { reason } => {
                warn!(webhook_id = %id, reason = %reason, "giving up on automatic retries");
                (
                    RetryUpdate {
                        retry_count: record.retry_count,
                        retry_history: history,
                        next_retry_at: None,
                        error_message: Some(format!("{reason}; last error: {cause}")),
                        download_status: Some(DownloadStatus::Failed),
                        bump_generation: false,
                    },
                    false,
                )
            },
        };

        match self.inner.store.update_for_retry(id, update).await {
            Ok(updated) if reschedule => {
                info!(
                    webhook_id = %id,
                    retry_count = updated.retry_count,
                    "automatic retry scheduled"
                );
                self.launch_cycle(id, updated.generation, self.inner.policy.delay);
            },
            Ok(_) => {},
            Err(e) => {
                error!(webhook_id = %id, error = %e, "failed to record retry bookkeeping");
            },
        }
    }

    async fn owns_generation(&self, id: WebhookId, generation: u64) -> Result<bool> {
        let Some(record) = self.inner.store.find(id).await? else {
            return Ok(false);
        };
        Ok(record.generation == generation)
    }
}

/// Builds the DAG run configuration for a record whose file sits at `key`.
fn dag_run_request(record: &WebhookRecord, key: &str) -> DagRunRequest {
    DagRunRequest {
        data_produto: record.data_produto.clone(),
        macro_processo: record.macro_processo.clone(),
        nome: record.nome.clone(),
        periodicidade: record.periodicidade.to_rfc3339(),
        periodicidade_final: record.periodicidade_final.to_rfc3339(),
        processo: record.processo.clone(),
        url: record.url.clone(),
        s3_key: key.to_string(),
        webhook_id: record.id.to_string(),
        filename: filename_from_key(key, record.id),
    }
}

/// Extracts the stored filename: the last key segment minus the `<id>_`
/// prefix the pipeline puts there.
fn filename_from_key(key: &str, id: WebhookId) -> String {
    let last = key.rsplit('/').next().unwrap_or(key);
    let prefix = format!("{id}_");
    last.strip_prefix(prefix.as_str()).unwrap_or(last).to_string()
}
