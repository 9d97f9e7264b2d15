//! Configuration for the launcher.
//!
//! `TunnelOptions` are supplied per start; `LauncherSettings` describe the
//! on-disk layout and timeouts shared by every start.

mod options;
mod settings;

pub use options::{
    Credentials, CsvList, LogSink, StatusLog, TunnelOptions, ACCESS_KEY_ENV, USERNAME_ENV,
};
pub use settings::{validate_base_url, LauncherSettings, DEFAULT_DOWNLOAD_BASE_URL};
