//! End-to-end engine tests over in-memory collaborators.
//!
//! The manual scheduler makes every fire-and-forget cycle explicit: nothing
//! runs until the test drains the queue, so intermediate states (a record
//! still pending before its first cycle, retry bookkeeping between attempts)
//! are directly observable.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use chrono::Utc;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

use relay_core::{
    DownloadStatus, InMemoryStore, NewWebhook, RecordFilter, RecordStore, RetryUpdate, WebhookId,
};
use relay_pipeline::{
    DagRunRequest, HttpFileFetcher, ManualScheduler, MemoryBlobStore, Notifier, PipelineError,
    ProcessingEngine, RetryPolicy,
};

/// Notifier double that records every trigger and can be told to fail.
#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<DagRunRequest>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<DagRunRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn trigger(&self, run: &DagRunRequest, _nome: &str) -> relay_pipeline::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PipelineError::notify(Some(502), "bad gateway"));
        }
        self.calls.lock().unwrap().push(run.clone());
        Ok(())
    }
}

/// Notifier double that supersedes the record while the trigger is in
/// flight, the way a manual retry landing mid-notification would.
struct SupersedingNotifier {
    store: Arc<InMemoryStore>,
    target: Mutex<Option<WebhookId>>,
}

#[async_trait]
impl Notifier for SupersedingNotifier {
    async fn trigger(&self, _run: &DagRunRequest, _nome: &str) -> relay_pipeline::Result<()> {
        let id = self.target.lock().unwrap().clone().expect("target record set");
        self.store
            .update_for_retry(
                id,
                RetryUpdate {
                    retry_count: 0,
                    retry_history: Vec::new(),
                    next_retry_at: None,
                    error_message: None,
                    download_status: Some(DownloadStatus::Pending),
                    bump_generation: true,
                },
            )
            .await
            .map_err(PipelineError::from)?;
        Ok(())
    }
}

struct Harness {
    engine: ProcessingEngine,
    store: Arc<InMemoryStore>,
    blob: Arc<MemoryBlobStore>,
    notifier: Arc<RecordingNotifier>,
    scheduler: Arc<ManualScheduler>,
    _scratch: tempfile::TempDir,
}

fn harness(policy: RetryPolicy) -> Harness {
    let scratch = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryStore::new());
    let blob = Arc::new(MemoryBlobStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let scheduler = Arc::new(ManualScheduler::new());
    let fetcher = Arc::new(HttpFileFetcher::new(scratch.path()).expect("fetcher"));

    let engine = ProcessingEngine::new(
        store.clone(),
        fetcher,
        blob.clone(),
        notifier.clone(),
        scheduler.clone(),
        policy,
    );

    Harness { engine, store, blob, notifier, scheduler, _scratch: scratch }
}

fn new_webhook(nome: &str, url: &str) -> NewWebhook {
    NewWebhook {
        nome: nome.to_string(),
        processo: "Programação Diária".to_string(),
        data_produto: "2024-05-02".to_string(),
        macro_processo: "Operação".to_string(),
        periodicidade: Utc::now(),
        periodicidade_final: Utc::now(),
        url: url.to_string(),
        download_status: None,
    }
}

async fn serve_pdf(server: &MockServer) {
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/file"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"pdf bytes".to_vec())
                .append_header("content-disposition", "attachment; filename=\"file.pdf\""),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn happy_path_stores_file_and_triggers_orchestrator() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let h = harness(RetryPolicy::default());
    let record =
        h.engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();

    // Intake returns before any network call: the cycle is only queued.
    assert_eq!(record.download_status, DownloadStatus::Pending);
    assert_eq!(h.scheduler.pending(), 1);
    let stored = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(stored.download_status, DownloadStatus::Pending);

    h.scheduler.run_pending().await;

    let done = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(done.download_status, DownloadStatus::Processed);

    let expected_key = format!("webhooks/IPDO/{}_file.pdf", record.id);
    assert_eq!(done.s3_key.as_deref(), Some(expected_key.as_str()));
    assert_eq!(h.blob.object(&expected_key).await.unwrap(), b"pdf bytes");

    let calls = h.notifier.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].nome, "IPDO");
    assert_eq!(calls[0].s3_key, expected_key);
    assert_eq!(calls[0].filename, "file.pdf");
    assert_eq!(calls[0].webhook_id, record.id.to_string());
}

#[tokio::test]
async fn failed_fetch_schedules_bounded_retries() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let policy = RetryPolicy { max_attempts: 2, delay: std::time::Duration::from_secs(300) };
    let h = harness(policy.clone());
    let record = h.engine.create(new_webhook("IPDO", &server.uri())).await.unwrap();

    // First cycle fails: retry 1 of 2 is scheduled.
    h.scheduler.run_pending().await;
    let after_first = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(after_first.download_status, DownloadStatus::Failed);
    assert_eq!(after_first.retry_count, 1);
    assert_eq!(after_first.retry_history.len(), 1);
    assert!(after_first.error_message.as_deref().unwrap().contains("500"));
    let next = after_first.next_retry_at.expect("retry must be scheduled");
    let expected = after_first.retry_history[0] + chrono::Duration::seconds(300);
    assert_eq!(next, expected);
    assert_eq!(h.scheduler.queued_delays(), vec![policy.delay]);

    // Second cycle fails: retry 2 of 2 is scheduled.
    h.scheduler.run_pending().await;
    let after_second = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(after_second.retry_count, 2);
    assert_eq!(after_second.retry_history.len(), 2);

    // Final cycle fails: the bound is reached and nothing else is queued.
    h.scheduler.run_pending().await;
    let exhausted = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(exhausted.download_status, DownloadStatus::Failed);
    assert_eq!(exhausted.retry_count, 2);
    assert_eq!(exhausted.retry_history.len(), 3);
    assert!(exhausted.next_retry_at.is_none());
    assert!(exhausted.error_message.as_deref().unwrap().contains("max retries (2)"));
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test]
async fn notify_failure_clears_storage_key_and_retries() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let h = harness(RetryPolicy::default());
    h.notifier.set_failing(true);

    let record =
        h.engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();
    h.scheduler.run_pending().await;

    // The upload happened, but the record must not claim a stored file while
    // it sits in FAILED.
    let failed = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(failed.download_status, DownloadStatus::Failed);
    assert!(failed.s3_key.is_none());
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error_message.as_deref().unwrap().contains("orchestrator"));
    assert_eq!(h.scheduler.pending(), 1);

    // The retry succeeds once the orchestrator recovers.
    h.notifier.set_failing(false);
    h.scheduler.run_pending().await;
    let done = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(done.download_status, DownloadStatus::Processed);
    assert!(done.s3_key.is_some());
}

#[tokio::test]
async fn manual_retry_resets_bookkeeping_and_relaunches() {
    let server = MockServer::start().await;
    // Fail the first request, then serve the file.
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"x".to_vec())
                .append_header("content-disposition", "attachment; filename=\"f.pdf\""),
        )
        .mount(&server)
        .await;

    let h = harness(RetryPolicy::default());
    let record = h.engine.create(new_webhook("IPDO", &server.uri())).await.unwrap();
    h.scheduler.run_pending().await;

    let failed = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(failed.download_status, DownloadStatus::Failed);
    assert_eq!(failed.retry_count, 1);

    let reset = h.engine.retry_download(record.id).await.unwrap();
    assert_eq!(reset.download_status, DownloadStatus::Pending);
    assert_eq!(reset.retry_count, 0);
    assert!(reset.retry_history.is_empty());
    assert!(reset.error_message.is_none());
    assert!(reset.next_retry_at.is_none());

    h.scheduler.run_pending().await;
    let done = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(done.download_status, DownloadStatus::Processed);
}

#[tokio::test]
async fn superseded_automatic_retry_aborts_quietly() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"x".to_vec())
                .append_header("content-disposition", "attachment; filename=\"f.pdf\""),
        )
        .mount(&server)
        .await;

    let h = harness(RetryPolicy::default());
    let record = h.engine.create(new_webhook("IPDO", &server.uri())).await.unwrap();
    h.scheduler.run_pending().await;

    // An automatic retry for the failure is queued; a manual retry now
    // supersedes it and queues a cycle of its own.
    assert_eq!(h.scheduler.pending(), 1);
    h.engine.retry_download(record.id).await.unwrap();
    assert_eq!(h.scheduler.pending(), 2);

    h.scheduler.run_pending().await;

    // Only the manual cycle touched the record: the stale one would have
    // pushed retry bookkeeping or a second orchestrator trigger.
    let done = h.store.find(record.id).await.unwrap().unwrap();
    assert_eq!(done.download_status, DownloadStatus::Processed);
    assert_eq!(done.retry_count, 0);
    assert_eq!(h.notifier.calls().len(), 1);
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test]
async fn supersession_during_notification_skips_processed_write() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let scratch = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryStore::new());
    let notifier =
        Arc::new(SupersedingNotifier { store: store.clone(), target: Mutex::new(None) });
    let scheduler = Arc::new(ManualScheduler::new());
    let engine = ProcessingEngine::new(
        store.clone(),
        Arc::new(HttpFileFetcher::new(scratch.path()).expect("fetcher")),
        Arc::new(MemoryBlobStore::new()),
        notifier.clone(),
        scheduler.clone(),
        RetryPolicy::default(),
    );

    let record =
        engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();
    *notifier.target.lock().unwrap() = Some(record.id);

    scheduler.run_pending().await;

    // The cycle lost ownership while the trigger was in flight: the record
    // belongs to the newer generation and must not be marked processed.
    let after = store.find(record.id).await.unwrap().unwrap();
    assert_eq!(after.download_status, DownloadStatus::Pending);
    assert_eq!(after.retry_count, 0);
}

#[tokio::test]
async fn manual_retry_rejects_downloaded_records() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let h = harness(RetryPolicy::default());
    let record =
        h.engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();
    h.scheduler.run_pending().await;

    let err = h.engine.retry_download(record.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition { .. }));

    let err = h.engine.retry_download(WebhookId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn reprocess_retriggers_without_downloading() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let h = harness(RetryPolicy::default());
    let record =
        h.engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();
    h.scheduler.run_pending().await;
    assert_eq!(h.notifier.calls().len(), 1);

    let updated = h.engine.reprocess(record.id).await.unwrap();
    assert_eq!(updated.download_status, DownloadStatus::Processed);

    // Second trigger, same stored key, and no new cycle was queued.
    let calls = h.notifier.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].s3_key, calls[1].s3_key);
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test]
async fn reprocess_requires_a_stored_file() {
    let h = harness(RetryPolicy::default());
    let record = h.engine.create(new_webhook("IPDO", "http://127.0.0.1:1/f")).await.unwrap();

    // Still pending, no upload happened yet.
    let err = h.engine.reprocess(record.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::Precondition { .. }));
}

#[tokio::test]
async fn download_url_signs_stored_files_only() {
    let server = MockServer::start().await;
    serve_pdf(&server).await;

    let h = harness(RetryPolicy::default());
    let record =
        h.engine.create(new_webhook("IPDO", &format!("{}/file", server.uri()))).await.unwrap();

    // A pending record has no addressable file yet.
    let err = h.engine.download_url(record.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));

    h.scheduler.run_pending().await;
    let url = h.engine.download_url(record.id).await.unwrap();
    assert!(url.contains(&format!("{}_file.pdf", record.id)));
    assert!(url.contains("expires=3600"));

    let err = h.engine.download_url(WebhookId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn timeline_groups_records_by_product() {
    let h = harness(RetryPolicy::default());
    // Cycles stay queued; the records remain pending for the query.
    h.engine.create(new_webhook("IPDO", "http://127.0.0.1:1/a")).await.unwrap();
    h.engine.create(new_webhook("IPDO", "http://127.0.0.1:1/b")).await.unwrap();
    h.engine.create(new_webhook("Modelo GEFS", "http://127.0.0.1:1/c")).await.unwrap();

    let timeline = h.engine.timeline(&RecordFilter::default()).await.unwrap();
    assert_eq!(timeline.groups.len(), 2);
    assert_eq!(timeline.groups[0].nome, "IPDO");
    assert_eq!(timeline.groups[0].events.len(), 2);
    assert_eq!(timeline.groups[1].nome, "Modelo GEFS");
    assert_eq!(timeline.groups[1].events.len(), 1);
}

#[tokio::test]
async fn filename_with_contingency_suffix_is_cleaned() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()).append_header(
                "content-disposition",
                "attachment; filename=\"ipdo_2° nível de contingência.pdf\"",
            ),
        )
        .mount(&server)
        .await;

    let h = harness(RetryPolicy::default());
    let record = h.engine.create(new_webhook("IPDO", &server.uri())).await.unwrap();
    h.scheduler.run_pending().await;

    let done = h.store.find(record.id).await.unwrap().unwrap();
    let key = done.s3_key.unwrap();
    assert!(key.ends_with(&format!("{}_ipdo.pdf", record.id)), "got {key}");
    assert_eq!(h.notifier.calls()[0].filename, "ipdo.pdf");
}
