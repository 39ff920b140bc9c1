//! Download and archive service
//!
//! Resolves revision download URLs, fetches archives with progress reporting,
//! waits for manual downloads when the server refuses a direct one, and
//! extracts/copies archive contents into the game folders.

mod archive;
mod http;

pub use archive::*;
pub use http::HttpDownloadSource;

use crate::catalogue::RevisionInfo;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between checks for a manually downloaded file
pub const MANUAL_DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Download progress: (bytes downloaded, total bytes, 0 when unknown)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP failure during a download: (status code, reason)
pub type ErrorCallback = Arc<dyn Fn(u16, String) + Send + Sync>;

/// Result of resolving a revision's download URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlResolution {
    Url(String),
    /// The server wants a human to download the file in a browser
    AuthDenied,
    HttpError(u16),
}

/// Result of fetching an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    File(PathBuf),
    AuthDenied,
    HttpError(u16),
}

/// The manual download did not show up in time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Timed out after {waited:?} waiting for {}", path.display())]
pub struct TimeoutError {
    pub path: PathBuf,
    pub waited: Duration,
}

/// Where archives come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadSource: Send + Sync {
    /// Turn a revision's download page into a direct file URL
    async fn resolve_url(&self, revision: &RevisionInfo) -> Result<UrlResolution>;

    /// Download `url` into `dest_dir`, returning the written file
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        on_progress: ProgressCallback,
        on_error: ErrorCallback,
    ) -> Result<FetchOutcome>;
}

/// Wait until `path` exists, checking once per second.
///
/// The calling run does not proceed until the file appears or `timeout`
/// elapses; nothing but the timeout can end the wait early.
pub async fn await_manual_download(
    path: &Path,
    timeout: Duration,
) -> Result<PathBuf, TimeoutError> {
    poll_for_file(path, timeout, MANUAL_DOWNLOAD_POLL_INTERVAL).await
}

async fn poll_for_file(
    path: &Path,
    timeout: Duration,
    interval: Duration,
) -> Result<PathBuf, TimeoutError> {
    let started = Instant::now();
    let mut waited = Duration::ZERO;

    loop {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if waited >= timeout {
            tracing::warn!("Gave up waiting for {}", path.display());
            return Err(TimeoutError {
                path: path.to_path_buf(),
                waited: started.elapsed(),
            });
        }

        tokio::time::sleep(interval).await;
        waited += interval;
    }
}
