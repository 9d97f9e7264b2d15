//! Sauce Connect launcher.
//!
//! Downloads the Sauce Connect tunnel binary for the current platform on
//! first use, starts it with the given credentials and options, and resolves
//! once the tunnel is ready to carry traffic.
//!
//! - [`installer`]: shared install directory, download and unpack
//! - [`supervisor`]: process spawn, output recognition, readiness
//! - [`lifecycle`]: the single tracked tunnel and host shutdown cleanup
//! - [`config`]: per-start options and launcher-wide settings

pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod installer;
pub mod launcher;
pub mod lifecycle;
pub mod paths;
pub mod platform;
pub mod signals;
pub mod supervisor;

pub use config::{CsvList, LauncherSettings, TunnelOptions};
pub use downloader::{ArchiveFetcher, DownloadProgress, HttpFetcher};
pub use error::LaunchError;
pub use launcher::{archive_name, clean, kill, start, Launcher};
pub use lifecycle::LifecycleGuard;
pub use platform::Platform;
pub use supervisor::{TunnelExit, TunnelHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
