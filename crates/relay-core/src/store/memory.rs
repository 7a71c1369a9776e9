//! In-memory record store.
//!
//! The shipped [`RecordStore`] implementation. State lives in a
//! `RwLock<HashMap>`, which serializes concurrent updates to the same record
//! id as the contract requires. Scheduled retries are in-process timers, so
//! a restart loses both records and pending retries; a database-backed store
//! behind the same trait closes that gap.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::RecordStore;
use crate::{
    error::{Result, StoreError},
    models::{
        DailyCounts, DownloadStatus, MetricsReport, NewWebhook, RecordFilter, RetryUpdate,
        StatusCounts, WebhookId, WebhookRecord,
    },
};

/// Thread-safe in-memory store keyed by webhook id.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<WebhookId, WebhookRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held. Mainly useful in tests.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create(&self, new: NewWebhook) -> Result<WebhookRecord> {
        let now = Utc::now();
        let record = WebhookRecord {
            id: WebhookId::new(),
            nome: new.nome,
            processo: new.processo,
            data_produto: new.data_produto,
            macro_processo: new.macro_processo,
            periodicidade: new.periodicidade,
            periodicidade_final: new.periodicidade_final,
            url: new.url,
            download_status: new.download_status.unwrap_or(DownloadStatus::Pending),
            s3_key: None,
            error_message: None,
            retry_count: 0,
            retry_history: Vec::new(),
            next_retry_at: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        };

        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find(&self, id: WebhookId) -> Result<Option<WebhookRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_many(&self, filter: &RecordFilter) -> Result<Vec<WebhookRecord>> {
        let records = self.records.read().await;
        let mut matched: Vec<WebhookRecord> =
            records.values().filter(|r| filter.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    async fn update_status(
        &self,
        id: WebhookId,
        status: DownloadStatus,
        error_message: Option<String>,
    ) -> Result<WebhookRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or_else(|| StoreError::missing(id))?;

        record.download_status = status;
        if let Some(message) = error_message {
            record.error_message = Some(message);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn set_storage_key(&self, id: WebhookId, key: &str) -> Result<WebhookRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or_else(|| StoreError::missing(id))?;

        record.s3_key = Some(key.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn update_for_retry(&self, id: WebhookId, update: RetryUpdate) -> Result<WebhookRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or_else(|| StoreError::missing(id))?;

        record.retry_count = update.retry_count;
        record.retry_history = update.retry_history;
        record.next_retry_at = update.next_retry_at;
        record.error_message = update.error_message;
        if let Some(status) = update.download_status {
            record.download_status = status;
            // Keep the key-presence invariant: only downloaded records carry one.
            if status == DownloadStatus::Failed {
                record.s3_key = None;
            }
        }
        if update.bump_generation {
            record.generation += 1;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn metrics(
        &self,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<MetricsReport> {
        let filter = RecordFilter { start_date, end_date, ..Default::default() };
        let records = self.records.read().await;

        let mut total = StatusCounts::default();
        let mut days: BTreeMap<chrono::NaiveDate, StatusCounts> = BTreeMap::new();

        for record in records.values().filter(|r| filter.matches(r)) {
            total.record(record.download_status);
            days.entry(record.created_at.date_naive())
                .or_default()
                .record(record.download_status);
        }

        let daily = days.into_iter().map(|(date, counts)| DailyCounts { date, counts }).collect();
        Ok(MetricsReport { total, daily })
    }

    async fn timeline(&self, filter: &RecordFilter) -> Result<Vec<WebhookRecord>> {
        self.find_many(filter).await
    }
}
