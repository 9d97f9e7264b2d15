//! Error type shared by every stage of the launcher.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by `start`, `kill` and `clean`.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Network or filesystem failure while fetching the archive.
    #[error("Failed to download {archive}: {reason}")]
    Download { archive: String, reason: String },

    /// Extraction of a downloaded archive failed.
    #[error("Couldn't unpack archive: {0}")]
    Unpack(String),

    /// The tunnel reported that it could not authenticate.
    #[error("Invalid Sauce Connect Credentials. {0}")]
    Credentials(String),

    /// The tunnel printed an `Error: ` line.
    #[error("{0}")]
    Tunnel(String),

    /// The tunnel exited before becoming ready.
    #[error("Could not start Sauce Connect. Exit code {} signal: {}", display_or_none(.code), display_or_none(.signal))]
    Start {
        code: Option<i32>,
        signal: Option<String>,
    },

    /// Checking the readiness file failed.
    #[error("Failed to watch readiness file {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another tunnel is already tracked by the lifecycle guard.
    #[error("A Sauce Connect tunnel is already running (tunnel #{0})")]
    AlreadyRunning(u64),

    /// The binary never appeared while another process held the archive.
    #[error("Timed out after {waited_secs}s waiting for {binary} to be installed")]
    InstallTimeout { binary: PathBuf, waited_secs: u64 },

    #[error("Missing credential: set `{option}` or the {env_var} environment variable")]
    MissingCredential {
        option: &'static str,
        env_var: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_or_none<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_error_message() {
        let err = LaunchError::Start {
            code: Some(3),
            signal: None,
        };
        assert_eq!(
            err.to_string(),
            "Could not start Sauce Connect. Exit code 3 signal: none"
        );

        let err = LaunchError::Start {
            code: None,
            signal: Some("SIGKILL".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Could not start Sauce Connect. Exit code none signal: SIGKILL"
        );
    }

    #[test]
    fn test_credentials_error_keeps_line() {
        let err = LaunchError::Credentials("Error: failed to remove matching tunnels".into());
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid Sauce Connect Credentials."));
        assert!(msg.contains("failed to remove matching tunnels"));
    }
}
