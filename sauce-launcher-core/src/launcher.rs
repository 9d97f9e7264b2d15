//! Public entry points: install if needed, then start the tunnel.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{LauncherSettings, TunnelOptions};
use crate::downloader::{ArchiveFetcher, HttpFetcher};
use crate::error::LaunchError;
use crate::installer::Installer;
use crate::lifecycle::LifecycleGuard;
use crate::platform::Platform;
use crate::supervisor::{self, SupervisorConfig, TunnelExit, TunnelHandle};

// ============================================================================
// Launcher
// ============================================================================

/// Installs and starts Sauce Connect.
///
/// ```no_run
/// # async fn demo() -> Result<(), sauce_launcher_core::LaunchError> {
/// use sauce_launcher_core::{Launcher, TunnelOptions};
///
/// let launcher = Launcher::new()?;
/// let tunnel = launcher.start(TunnelOptions::new()).await?;
/// // ... run tests ...
/// tunnel.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Launcher {
    settings: LauncherSettings,
    platform: Platform,
    fetcher: Arc<dyn ArchiveFetcher>,
    guard: Arc<LifecycleGuard>,
}

impl Launcher {
    /// A launcher with default settings for the current platform.
    pub fn new() -> Result<Self, LaunchError> {
        Self::with_settings(LauncherSettings::default())
    }

    pub fn with_settings(settings: LauncherSettings) -> Result<Self, LaunchError> {
        settings.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&settings.download_base_url)?);
        Ok(Self {
            settings,
            platform: Platform::detect(),
            fetcher,
            guard: LifecycleGuard::global(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Uses `guard` instead of the process-wide guard.
    pub fn with_guard(mut self, guard: Arc<LifecycleGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn guard(&self) -> &Arc<LifecycleGuard> {
        &self.guard
    }

    /// File name of the archive this launcher downloads.
    pub fn archive_name(&self) -> &'static str {
        self.platform.archive_name()
    }

    pub fn binary_path(&self) -> PathBuf {
        self.platform.binary_path(&self.settings.install_dir)
    }

    pub fn installer(&self) -> Installer {
        Installer::new(
            self.settings.install_dir.clone(),
            self.platform,
            Arc::clone(&self.fetcher),
        )
        .with_poll_interval(self.settings.install_poll_interval())
        .with_wait_timeout(self.settings.install_wait_timeout())
    }

    /// Installs the binary if needed, starts it, and resolves once the
    /// tunnel is ready.
    pub async fn start(&self, options: TunnelOptions) -> Result<TunnelHandle, LaunchError> {
        // Bad options fail before anything is downloaded.
        options.validate()?;
        let credentials = options.credentials()?;
        self.guard.ensure_idle().await?;

        let binary = self.installer().ensure_installed(&options.status_log()).await?;

        let config = SupervisorConfig {
            binary,
            readyfile: self.settings.readyfile.clone(),
            ready_poll: self.settings.ready_poll_interval(),
            close_timeout: self.settings.close_timeout(),
        };
        supervisor::launch(&options, &credentials, &config, &self.guard).await
    }

    /// Stops the tracked tunnel, if any, and waits for it to exit.
    pub async fn kill(&self) -> Option<TunnelExit> {
        self.guard
            .kill_processes(self.settings.close_timeout())
            .await
    }

    /// Stops the tracked tunnel and removes the install directory, so the
    /// next start downloads afresh.
    pub async fn clean(&self) -> Result<(), LaunchError> {
        self.kill().await;

        let dir = &self.settings.install_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => info!("Removed {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("settings", &self.settings)
            .field("platform", &self.platform)
            .finish()
    }
}

// ============================================================================
// Free Functions
// ============================================================================

/// Starts a tunnel with default settings and the process-wide guard.
pub async fn start(options: TunnelOptions) -> Result<TunnelHandle, LaunchError> {
    Launcher::new()?.start(options).await
}

/// Stops the tunnel tracked by the process-wide guard.
pub async fn kill() -> Option<TunnelExit> {
    LifecycleGuard::global()
        .kill_processes(LauncherSettings::default().close_timeout())
        .await
}

/// Archive name for the current platform.
pub fn archive_name() -> &'static str {
    Platform::detect().archive_name()
}

/// Stops the tracked tunnel and removes the default install directory.
pub async fn clean() -> Result<(), LaunchError> {
    Launcher::new()?.clean().await
}
