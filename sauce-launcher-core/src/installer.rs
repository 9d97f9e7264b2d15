//! Makes sure the Sauce Connect binary is present in the install directory.
//!
//! The install directory is shared between processes and is always in one
//! of three states, decided purely by which files exist:
//!
//! | binary | archive | state                                   |
//! |--------|---------|-----------------------------------------|
//! | yes    | any     | [`InstallState::Installed`]             |
//! | no     | no      | [`InstallState::Missing`], download it  |
//! | no     | yes     | [`InstallState::InProgress`], wait      |

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::StatusLog;
use crate::downloader::{ArchiveFetcher, ArchiveGuard, DownloadProgress};
use crate::error::LaunchError;
use crate::extractor::{make_executable, unpack_archive};
use crate::paths;
use crate::platform::Platform;

/// What [`Installer::state`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Installed,
    Missing,
    /// Another process (or task) is downloading or unpacking.
    InProgress,
}

/// Installs one platform's distribution into one directory.
pub struct Installer {
    install_dir: PathBuf,
    platform: Platform,
    fetcher: Arc<dyn ArchiveFetcher>,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
}

impl Installer {
    pub fn new(
        install_dir: PathBuf,
        platform: Platform,
        fetcher: Arc<dyn ArchiveFetcher>,
    ) -> Self {
        Self {
            install_dir,
            platform,
            fetcher,
            poll_interval: Duration::from_secs(1),
            wait_timeout: Some(Duration::from_secs(600)),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `None` waits for a concurrent install indefinitely.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn binary_path(&self) -> PathBuf {
        self.platform.binary_path(&self.install_dir)
    }

    pub fn archive_path(&self) -> PathBuf {
        paths::archive_path(&self.install_dir, self.platform.archive_name())
    }

    pub fn state(&self) -> InstallState {
        if self.binary_path().exists() {
            InstallState::Installed
        } else if self.archive_path().exists() {
            InstallState::InProgress
        } else {
            InstallState::Missing
        }
    }

    /// Returns the binary path once the binary exists, downloading and
    /// unpacking the archive or waiting on another installer as needed.
    pub async fn ensure_installed(&self, log: &StatusLog) -> Result<PathBuf, LaunchError> {
        tokio::fs::create_dir_all(&self.install_dir).await?;

        let binary = self.binary_path();
        match self.state() {
            InstallState::Installed => debug!("Sauce Connect found at {}", binary.display()),
            InstallState::Missing => self.acquire(log).await?,
            InstallState::InProgress => self.wait_for_binary().await?,
        }
        Ok(binary)
    }

    async fn acquire(&self, log: &StatusLog) -> Result<(), LaunchError> {
        let archive_name = self.platform.archive_name();
        let archive_path = self.archive_path();

        log.line("Missing Sauce Connect local proxy, downloading dependency");
        log.line("This will only happen once.");

        let guard = ArchiveGuard::arm(archive_path.clone());

        let announced = AtomicBool::new(false);
        let progress = |p: DownloadProgress| {
            if let Some(total) = p.total_bytes {
                if !announced.swap(true, Ordering::Relaxed) {
                    log.line(&format!("Downloading {}", pretty_size(total)));
                }
            }
            if let Some(percent) = p.percent {
                debug!("Sauce Connect download {:.1}%", percent);
            }
        };

        let bytes = self
            .fetcher
            .fetch(archive_name, &archive_path, &progress)
            .await?;
        debug!("Fetched {} ({} bytes)", archive_name, bytes);

        log.line(&format!("Unzipping {}", archive_name));
        unpack_archive(&archive_path, &self.install_dir)
            .await
            .map_err(|e| LaunchError::Unpack(format!("{:#}", e)))?;

        log.line(&format!("Removing {}", archive_name));
        drop(guard);

        let binary = self.binary_path();
        if !binary.exists() {
            return Err(LaunchError::Unpack(format!(
                "{} did not contain {}",
                archive_name,
                binary
                    .strip_prefix(&self.install_dir)
                    .unwrap_or(&binary)
                    .display()
            )));
        }
        make_executable(&binary).map_err(|e| LaunchError::Unpack(format!("{:#}", e)))?;

        log.line("Sauce Connect installed correctly");
        Ok(())
    }

    async fn wait_for_binary(&self) -> Result<(), LaunchError> {
        let binary = self.binary_path();
        info!(
            "Found {}, waiting for another installer to finish",
            self.archive_path().display()
        );

        let started = Instant::now();
        loop {
            tokio::time::sleep(self.poll_interval).await;
            if binary.exists() {
                debug!("Sauce Connect appeared at {}", binary.display());
                return Ok(());
            }
            if let Some(limit) = self.wait_timeout {
                if started.elapsed() >= limit {
                    return Err(LaunchError::InstallTimeout {
                        binary,
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }
        }
    }
}

/// e.g. `8.2MB`
fn pretty_size(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
}
