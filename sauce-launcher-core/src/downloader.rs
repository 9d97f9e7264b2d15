//! Archive download with progress reporting.
//!
//! The [`ArchiveFetcher`] trait is the seam between the installer and the
//! network. [`HttpFetcher`] streams `{base}/downloads/{archive}` to disk with
//! reqwest. [`ArchiveGuard`] makes sure a partially written archive does not
//! survive a failed download or a host termination signal.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::validate_base_url;
use crate::error::LaunchError;
use crate::signals::{HookId, ShutdownHooks};

// ============================================================================
// Download Progress
// ============================================================================

/// Progress information during a download.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub bytes_downloaded: u64,
    /// Total bytes expected (if known from Content-Length header).
    pub total_bytes: Option<u64>,
    /// Progress percentage (0.0 to 100.0), or None if total is unknown.
    pub percent: Option<f32>,
}

impl DownloadProgress {
    pub(crate) fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        });

        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// Callback receiving download progress.
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

// ============================================================================
// Fetcher
// ============================================================================

/// Retrieves a distribution archive and writes it to `dest`.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Returns the number of bytes written. `dest` is fully flushed to disk
    /// when this returns `Ok`.
    async fn fetch(
        &self,
        archive_name: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, LaunchError>;
}

/// Fetches archives over HTTP from the Sauce Labs downloads path.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher for `base_url` (scheme and host, optionally a path
    /// prefix).
    pub fn new(base_url: &str) -> Result<Self, LaunchError> {
        Ok(Self {
            base_url: validate_base_url(base_url)?,
            client: reqwest::Client::new(),
        })
    }

    /// e.g. `http://saucelabs.com/downloads/sc-4.0-latest-linux.tar.gz`
    pub fn download_url(&self, archive_name: &str) -> String {
        format!(
            "{}/downloads/{}",
            self.base_url.as_str().trim_end_matches('/'),
            archive_name
        )
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(
        &self,
        archive_name: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> Result<u64, LaunchError> {
        let url = self.download_url(archive_name);
        let fail = |reason: String| LaunchError::Download {
            archive: archive_name.to_string(),
            reason,
        };

        info!("Downloading {} to {}", url, dest.display());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                fail(format!("failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fail(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!(
                "server returned {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let total_bytes = response.content_length();
        debug!("Content-Length: {:?}", total_bytes);

        let mut file = File::create(dest)
            .await
            .map_err(|e| fail(format!("failed to create {}: {}", dest.display(), e)))?;

        let mut stream = response.bytes_stream();
        let mut bytes_downloaded: u64 = 0;

        progress(DownloadProgress::new(0, total_bytes));

        while let Some(chunk_result) = stream.next().await {
            let chunk =
                chunk_result.map_err(|e| fail(format!("failed to read response body: {}", e)))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| fail(format!("failed to write {}: {}", dest.display(), e)))?;

            bytes_downloaded += chunk.len() as u64;
            progress(DownloadProgress::new(bytes_downloaded, total_bytes));
        }

        // The unpacker may be an external program; the bytes must be on disk
        // before it opens the file.
        file.flush()
            .await
            .map_err(|e| fail(format!("failed to flush {}: {}", dest.display(), e)))?;
        file.sync_all()
            .await
            .map_err(|e| fail(format!("failed to sync {}: {}", dest.display(), e)))?;

        info!(
            "Download complete: {} bytes written to {}",
            bytes_downloaded,
            dest.display()
        );

        Ok(bytes_downloaded)
    }
}

// ============================================================================
// Archive Guard
// ============================================================================

/// Removes the archive at `path` when dropped or when the host is told to
/// terminate while the guard is alive.
///
/// The presence of the archive tells other processes an install is in
/// progress, so it must never outlive the process that is writing it.
pub struct ArchiveGuard {
    path: PathBuf,
    hooks: &'static ShutdownHooks,
    hook: Option<HookId>,
}

impl ArchiveGuard {
    /// Arms the guard on the process-wide shutdown hooks.
    pub fn arm(path: PathBuf) -> Self {
        Self::arm_in(ShutdownHooks::global(), path, true)
    }

    fn arm_in(hooks: &'static ShutdownHooks, path: PathBuf, listen: bool) -> Self {
        let hook_path = path.clone();
        let id = hooks.register("remove partial archive", move || {
            let path = hook_path.clone();
            async move { remove_archive(&path) }
        });
        if listen {
            hooks.listen();
        }
        Self {
            path,
            hooks,
            hook: Some(id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArchiveGuard {
    fn drop(&mut self) {
        if let Some(id) = self.hook.take() {
            self.hooks.unregister(id);
        }
        remove_archive(&self.path);
    }
}

fn remove_archive(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed archive {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove archive {}: {}", path.display(), e),
    }
}
