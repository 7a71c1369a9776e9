//! Webhook intake, queries, and manual actions.
//!
//! Intake persists the record and returns immediately; file processing runs
//! in the background. Query parameters use the upstream wire names
//! (`startDate`, `endDate`), and dates are accepted either as RFC 3339
//! timestamps or as plain `YYYY-MM-DD` days.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use relay_core::{DownloadStatus, MetricsReport, NewWebhook, RecordFilter, WebhookRecord};
use relay_pipeline::Timeline;

use super::AppState;
use crate::error::ApiError;

/// Date-window and status filters, upstream wire names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    /// Inclusive lower bound on creation time.
    pub start_date: Option<String>,
    /// Inclusive upper bound on creation time.
    pub end_date: Option<String>,
    /// Restrict to one download status.
    pub status: Option<DownloadStatus>,
    /// Restrict to one product name.
    pub nome: Option<String>,
}

impl FilterQuery {
    fn to_filter(&self) -> Result<RecordFilter, ApiError> {
        Ok(RecordFilter {
            start_date: self.start_date.as_deref().map(parse_start_date).transpose()?,
            end_date: self.end_date.as_deref().map(parse_end_date).transpose()?,
            status: self.status,
            nome: self.nome.clone(),
        })
    }
}

/// Parses a date parameter as RFC 3339, or a plain day at its start.
fn parse_start_date(value: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_date(value, false)
}

/// Parses a date parameter as RFC 3339, or a plain day at its end, so that
/// `endDate=2024-05-02` includes the whole day.
fn parse_end_date(value: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_date(value, true)
}

fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("invalid date: {value}")))?;
    let time = if end_of_day {
        day.and_hms_opt(23, 59, 59)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    // Both times are valid for every calendar day.
    time.map(|t| t.and_utc())
        .ok_or_else(|| ApiError::bad_request(format!("invalid date: {value}")))
}

/// Accepts a Sintegre webhook notification.
///
/// Persists the record and launches the processing cycle in the background;
/// the response never waits for the download.
#[instrument(name = "ingest_webhook", skip(state, new), fields(nome = %new.nome))]
pub async fn ingest(
    State(state): State<AppState>,
    Json(new): Json<NewWebhook>,
) -> Result<impl IntoResponse, ApiError> {
    info!(url = %new.url, "webhook notification received");
    let record = state.engine.create(new).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Lists records matching the optional filters, newest first.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<WebhookRecord>>, ApiError> {
    let filter = query.to_filter()?;
    Ok(Json(state.engine.find_all(&filter).await?))
}

/// Per-status totals and a per-day breakdown over an optional window.
pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<MetricsReport>, ApiError> {
    let filter = query.to_filter()?;
    Ok(Json(state.engine.metrics(filter.start_date, filter.end_date).await?))
}

/// All records grouped by product name.
pub async fn timeline(State(state): State<AppState>) -> Result<Json<Timeline>, ApiError> {
    Ok(Json(state.engine.timeline(&RecordFilter::default()).await?))
}

/// Filtered records grouped by product name.
pub async fn timeline_filtered(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Timeline>, ApiError> {
    let filter = query.to_filter()?;
    Ok(Json(state.engine.timeline(&filter).await?))
}

/// Fetches one record by id.
pub async fn find_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookRecord>, ApiError> {
    Ok(Json(state.engine.find_one(id.into()).await?))
}

/// Signs a fresh download URL for a record's stored file.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let url = state.engine.download_url(id.into()).await?;
    Ok(Json(json!({ "url": url })))
}

/// Re-triggers the orchestrator run for an already-stored file.
#[instrument(name = "reprocess_webhook", skip(state), fields(webhook_id = %id))]
pub async fn reprocess(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookRecord>, ApiError> {
    Ok(Json(state.engine.reprocess(id.into()).await?))
}

/// Manually restarts processing for a record that is not downloaded yet.
#[instrument(name = "retry_download", skip(state), fields(webhook_id = %id))]
pub async fn retry_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WebhookRecord>, ApiError> {
    Ok(Json(state.engine.retry_download(id.into()).await?))
}
