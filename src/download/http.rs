//! Archive downloads over HTTP

use super::{DownloadSource, ErrorCallback, FetchOutcome, ProgressCallback, UrlResolution};
use crate::catalogue::RevisionInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use regex_lite::Regex;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_FILENAME: &str = "download.zip";

/// Downloads archives straight from the revision's hosting server
#[derive(Clone)]
pub struct HttpDownloadSource {
    client: Arc<reqwest::Client>,
}

impl HttpDownloadSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("smods-manager/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client: Arc::new(client),
        })
    }
}

#[async_trait]
impl DownloadSource for HttpDownloadSource {
    async fn resolve_url(&self, revision: &RevisionInfo) -> Result<UrlResolution> {
        let response = self
            .client
            .get(&revision.download_url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", revision.download_url))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            tracing::info!("Direct download refused for revision {}", revision.id);
            return Ok(UrlResolution::AuthDenied);
        }
        if !status.is_success() {
            return Ok(UrlResolution::HttpError(status.as_u16()));
        }

        Ok(UrlResolution::Url(response.url().to_string()))
    }

    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        on_progress: ProgressCallback,
        on_error: ErrorCallback,
    ) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download")?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Ok(FetchOutcome::AuthDenied);
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown error");
            on_error(status.as_u16(), reason.to_string());
            return Ok(FetchOutcome::HttpError(status.as_u16()));
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(response.url()))
            .unwrap_or_else(|| FALLBACK_FILENAME.to_string());

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let dest = dest_dir.join(&filename);
        let partial = partial_path(&dest);

        let total_size = response.content_length().unwrap_or(0);
        let downloaded =
            save_stream(response.bytes_stream(), &partial, total_size, &on_progress).await?;

        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            discard_partial(&partial).await;
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to move download to {}", dest.display())));
        }

        tracing::info!("Downloaded {} ({} bytes)", dest.display(), downloaded);
        Ok(FetchOutcome::File(dest))
    }
}

/// Write `stream` to `partial`, removing the file again if anything fails
async fn save_stream<S, B, E>(
    stream: S,
    partial: &Path,
    total_size: u64,
    on_progress: &ProgressCallback,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let result = write_stream(stream, partial, total_size, on_progress).await;
    if result.is_err() {
        discard_partial(partial).await;
    }
    result
}

async fn write_stream<S, B, E>(
    stream: S,
    partial: &Path,
    total_size: u64,
    on_progress: &ProgressCallback,
) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut file = tokio::fs::File::create(partial)
        .await
        .context("Failed to create download file")?;

    let mut downloaded: u64 = 0;
    let mut stream = std::pin::pin!(stream);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .context("Error writing to file")?;
        downloaded += bytes.len() as u64;
        on_progress(downloaded, total_size);
    }

    file.flush().await.context("Error writing to file")?;
    Ok(downloaded)
}

async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial download {}: {}", partial.display(), e);
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn filename_from_disposition(header: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).expect("valid regex")
    });

    re.captures(header)
        .and_then(|c| c.get(1))
        .map(|m| sanitize_filename(m.as_str()))
        .filter(|n| !n.is_empty())
}

fn filename_from_url(url: &reqwest::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(sanitize_filename)
        .filter(|n| !n.is_empty())
}

fn sanitize_filename(name: &str) -> String {
    name.trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim_matches('.')
        .to_string()
}
