//! Launcher settings.
//!
//! Settings describe where the launcher keeps its files and how long it is
//! willing to wait. They can be loaded from a JSON file; missing keys take
//! their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::LaunchError;
use crate::paths;

/// Host serving the Sauce Connect archives.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "http://saucelabs.com";

fn default_install_poll_millis() -> u64 {
    1000
}

fn default_ready_poll_millis() -> u64 {
    250
}

fn default_install_wait_timeout_secs() -> Option<u64> {
    Some(600)
}

fn default_close_timeout_secs() -> Option<u64> {
    Some(30)
}

fn default_download_base_url() -> String {
    DEFAULT_DOWNLOAD_BASE_URL.to_string()
}

// =============================================================================
// Launcher Settings
// =============================================================================

/// Launcher-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherSettings {
    /// Directory holding the downloaded archive or the unpacked binary.
    #[serde(default = "paths::default_install_dir")]
    pub install_dir: PathBuf,

    /// File the binary creates once the tunnel is up.
    #[serde(default = "paths::default_readyfile")]
    pub readyfile: PathBuf,

    /// Scheme and host the archive is fetched from.
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Interval between checks while another process installs the binary.
    #[serde(default = "default_install_poll_millis")]
    pub install_poll_millis: u64,

    /// Interval between readiness file checks.
    #[serde(default = "default_ready_poll_millis")]
    pub ready_poll_millis: u64,

    /// Upper bound on waiting for a concurrent install. `None` waits forever.
    #[serde(default = "default_install_wait_timeout_secs")]
    pub install_wait_timeout_secs: Option<u64>,

    /// Grace period after SIGTERM before the tunnel is killed. `None` waits
    /// forever.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: Option<u64>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            install_dir: paths::default_install_dir(),
            readyfile: paths::default_readyfile(),
            download_base_url: default_download_base_url(),
            install_poll_millis: default_install_poll_millis(),
            ready_poll_millis: default_ready_poll_millis(),
            install_wait_timeout_secs: default_install_wait_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
        }
    }
}

impl LauncherSettings {
    /// Loads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, LaunchError> {
        let json = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json).map_err(|e| {
            LaunchError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the download URL and polling intervals.
    pub fn validate(&self) -> Result<(), LaunchError> {
        validate_base_url(&self.download_base_url)?;
        if self.install_poll_millis == 0 || self.ready_poll_millis == 0 {
            return Err(LaunchError::Config(
                "poll intervals must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn install_poll_interval(&self) -> Duration {
        Duration::from_millis(self.install_poll_millis)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_millis)
    }

    pub fn install_wait_timeout(&self) -> Option<Duration> {
        self.install_wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn close_timeout(&self) -> Option<Duration> {
        self.close_timeout_secs.map(Duration::from_secs)
    }
}

/// Validates that a download base URL is plain http(s) with a host.
pub fn validate_base_url(url_str: &str) -> Result<Url, LaunchError> {
    let url = Url::parse(url_str)
        .map_err(|e| LaunchError::Config(format!("invalid download URL {}: {}", url_str, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(LaunchError::Config(format!(
            "download URL must use http or https: {}",
            url_str
        )));
    }

    if url.host_str().is_none() {
        return Err(LaunchError::Config(format!(
            "download URL must have a host: {}",
            url_str
        )));
    }

    Ok(url)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = LauncherSettings::default();
        assert_eq!(settings.download_base_url, "http://saucelabs.com");
        assert_eq!(settings.install_poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.install_wait_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(settings.close_timeout(), Some(Duration::from_secs(30)));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("launcher.json");
        std::fs::write(
            &path,
            r#"{"installDir": "/opt/sc", "installWaitTimeoutSecs": null, "readyPollMillis": 50}"#,
        )
        .unwrap();

        let settings = LauncherSettings::load(&path).unwrap();
        assert_eq!(settings.install_dir, PathBuf::from("/opt/sc"));
        assert_eq!(settings.install_wait_timeout(), None);
        assert_eq!(settings.ready_poll_interval(), Duration::from_millis(50));
        assert_eq!(settings.close_timeout_secs, Some(30));
        assert_eq!(settings.readyfile, paths::default_readyfile());
    }

    #[test]
    fn test_load_rejects_zero_poll() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("launcher.json");
        std::fs::write(&path, r#"{"installPollMillis": 0}"#).unwrap();
        assert!(matches!(
            LauncherSettings::load(&path),
            Err(LaunchError::Config(_))
        ));
    }

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url("http://saucelabs.com").is_ok());
        assert!(validate_base_url("https://saucelabs.com").is_ok());
        assert!(validate_base_url("ftp://saucelabs.com").is_err());
        assert!(validate_base_url("file:///etc/passwd").is_err());
        assert!(validate_base_url("not-a-url").is_err());
    }
}
