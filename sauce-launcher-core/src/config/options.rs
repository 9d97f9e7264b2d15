//! Per-start tunnel options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::LaunchError;

/// Environment variable used when `username` is not set.
pub const USERNAME_ENV: &str = "SAUCE_USERNAME";

/// Environment variable used when `accessKey` is not set.
pub const ACCESS_KEY_ENV: &str = "SAUCE_ACCESS_KEY";

/// Receives human-readable status lines.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

// =============================================================================
// Comma-separated lists
// =============================================================================

/// A value that may be given as a single string or a list of strings and is
/// passed to the binary as one comma-joined argument.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "CsvInput", into = "String")]
pub struct CsvList(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum CsvInput {
    One(String),
    Many(Vec<String>),
}

impl CsvList {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<CsvInput> for CsvList {
    fn from(input: CsvInput) -> Self {
        match input {
            CsvInput::One(value) => Self(value),
            CsvInput::Many(values) => Self(values.join(",")),
        }
    }
}

impl From<CsvList> for String {
    fn from(list: CsvList) -> Self {
        list.0
    }
}

impl From<&str> for CsvList {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CsvList {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<S: AsRef<str>> FromIterator<S> for CsvList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let parts: Vec<String> = iter.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self(parts.join(","))
    }
}

impl fmt::Display for CsvList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tunnel Options
// =============================================================================

/// Options for a single tunnel start. Every field is optional.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelOptions {
    /// Sauce Labs user name (falls back to `SAUCE_USERNAME`).
    pub username: Option<String>,
    /// Sauce Labs access key (falls back to `SAUCE_ACCESS_KEY`).
    pub access_key: Option<String>,
    /// Port of the local Selenium relay.
    pub port: Option<u16>,
    /// Upstream proxy, `host:port`.
    pub proxy: Option<String>,
    /// Domains that bypass the tunnel.
    pub direct_domains: Option<CsvList>,
    /// Requests matching any of these regexps fail fast.
    pub fast_fail_regexps: Option<CsvList>,
    /// Log file written by the tunnel binary.
    pub logfile: Option<PathBuf>,
    pub tunnel_identifier: Option<String>,
    /// Echo every line of tunnel output.
    pub verbose: bool,
    /// Optional receiver for status lines.
    #[serde(skip)]
    pub logger: Option<LogSink>,
}

/// Resolved credentials passed as `-u`/`-k`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

impl TunnelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self, LaunchError> {
        serde_json::from_str(json)
            .map_err(|e| LaunchError::Config(format!("invalid tunnel options: {}", e)))
    }

    /// Sets the status line receiver.
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Resolves credentials from the options, then the process environment.
    pub fn credentials(&self) -> Result<Credentials, LaunchError> {
        self.credentials_with(|name| std::env::var(name).ok())
    }

    /// Resolves credentials using `env` to look up fallback variables.
    pub fn credentials_with<F>(&self, env: F) -> Result<Credentials, LaunchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: &Option<String>, var: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| env(var).filter(|v| !v.is_empty()))
        };

        let username = pick(&self.username, USERNAME_ENV).ok_or(LaunchError::MissingCredential {
            option: "username",
            env_var: USERNAME_ENV,
        })?;
        let access_key =
            pick(&self.access_key, ACCESS_KEY_ENV).ok_or(LaunchError::MissingCredential {
                option: "accessKey",
                env_var: ACCESS_KEY_ENV,
            })?;

        Ok(Credentials {
            username,
            access_key,
        })
    }

    /// Checks that every fast-fail pattern compiles.
    pub fn validate(&self) -> Result<(), LaunchError> {
        if let Some(patterns) = &self.fast_fail_regexps {
            for pattern in patterns.as_str().split(',').filter(|p| !p.is_empty()) {
                regex::Regex::new(pattern).map_err(|e| {
                    LaunchError::Config(format!("invalid fast-fail regexp `{}`: {}", pattern, e))
                })?;
            }
        }
        Ok(())
    }

    /// Status line emitter for this start.
    pub fn status_log(&self) -> StatusLog {
        StatusLog {
            sink: self.logger.clone(),
        }
    }
}

impl fmt::Debug for TunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelOptions")
            .field("username", &self.username)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("proxy", &self.proxy)
            .field("direct_domains", &self.direct_domains)
            .field("fast_fail_regexps", &self.fast_fail_regexps)
            .field("logfile", &self.logfile)
            .field("tunnel_identifier", &self.tunnel_identifier)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

// =============================================================================
// Status Log
// =============================================================================

/// Emits status lines to tracing and to the caller's sink, if any.
#[derive(Clone, Default)]
pub struct StatusLog {
    sink: Option<LogSink>,
}

impl StatusLog {
    pub fn line(&self, message: &str) {
        info!("{}", message);
        if let Some(sink) = &self.sink {
            sink(message);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
