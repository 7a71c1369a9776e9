//! Remote file fetcher with scratch-file staging.
//!
//! Downloads a report file over HTTP, derives its filename from the
//! `Content-Disposition` header when present, and writes the body to a
//! process-wide scratch directory. Retries are the engine's responsibility;
//! the fetcher fails fast with a [`PipelineError::Fetch`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    sanitize::decode_mime_words,
};

/// A file staged in scratch storage.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Scratch location of the downloaded body.
    pub local_path: PathBuf,
    /// Filename derived from response metadata (or synthesized).
    pub file_name: String,
}

/// Retrieves a remote file into local scratch storage.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Downloads `url` and stages it locally.
    async fn fetch(&self, url: &str) -> Result<FetchedFile>;
}

/// HTTP implementation backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    client: reqwest::Client,
    temp_dir: PathBuf,
}

impl HttpFileFetcher {
    /// Creates a fetcher writing into `temp_dir`, creating it if needed.
    ///
    /// The directory is created once here; concurrent cycles then write
    /// distinct files into it and each deletes only its own.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Result<Self> {
        let temp_dir = temp_dir.into();
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            PipelineError::internal(format!(
                "failed to create scratch directory {}: {e}",
                temp_dir.display()
            ))
        })?;

        Ok(Self { client: reqwest::Client::new(), temp_dir })
    }

    /// Scratch directory files are staged under.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFile> {
        debug!(url, "starting file download");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::fetch(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(
                url,
                format!("upstream returned HTTP {}", status.as_u16()),
            ));
        }

        let file_name = file_name_from_response(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::fetch(url, format!("failed to read body: {e}")))?;

        let local_path = self.temp_dir.join(&file_name);
        tokio::fs::write(&local_path, &body).await.map_err(|e| {
            PipelineError::fetch(url, format!("failed to write {}: {e}", local_path.display()))
        })?;

        debug!(
            url,
            file_name,
            path = %local_path.display(),
            bytes = body.len(),
            "file downloaded to scratch storage"
        );

        Ok(FetchedFile { local_path, file_name })
    }
}

/// Derives the filename for a response.
///
/// Prefers the `filename=` parameter of `Content-Disposition` (quotes
/// stripped, MIME encoded-words decoded); otherwise synthesizes a name from
/// the current time. The header is read as raw bytes: upstream sends
/// filenames with non-ASCII characters unencoded, and those must still reach
/// the cleanup step. The result is reduced to a single path component so a
/// hostile header cannot escape the scratch directory.
fn file_name_from_response(response: &reqwest::Response) -> String {
    let name = response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .and_then(|v| file_name_from_disposition(&v))
        .map(|n| strip_path_components(&n));

    match name {
        Some(n) if !n.is_empty() && n != "." && n != ".." => n,
        _ => format!("file-{}", Utc::now().timestamp_millis()),
    }
}

/// Keeps only the final path component of a header-supplied filename.
fn strip_path_components(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

fn file_name_from_disposition(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        let rest = part.strip_prefix("filename")?;
        // Tolerate parameter variants like `filename*=`.
        let rest = rest.trim_start_matches(|c: char| c != '=').strip_prefix('=')?;
        let name = rest.trim().trim_matches(['"', '\'']).to_string();
        if name.is_empty() {
            return None;
        }
        Some(decode_mime_words(&name))
    })
}
