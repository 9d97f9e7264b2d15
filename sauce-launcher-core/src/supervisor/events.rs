//! Recognition of the tunnel's stdout.
//!
//! Each line is trimmed and checked against [`TRIGGERS`] in order; the first
//! phrase it contains decides the event. Lines that match nothing are only
//! logged.

use std::fmt;

use crate::error::LaunchError;

/// Printed once the tunnel has started negotiating with Sauce Labs.
pub const CONNECTING: &str = "Please wait for 'you may start your tests' to start your tests";
pub const OUTDATED: &str = "This version of Sauce Connect is outdated";
pub const ERROR_PREFIX: &str = "Error: ";
pub const GOODBYE: &str = "Goodbye.";

/// Part of the error line printed when the credentials are rejected.
pub const INVALID_CREDENTIALS: &str = "failed to remove matching tunnels";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connecting,
    Outdated,
    Error,
    ShuttingDown,
}

/// Phrases in match priority order.
pub const TRIGGERS: &[(&str, Trigger)] = &[
    (CONNECTING, Trigger::Connecting),
    (OUTDATED, Trigger::Outdated),
    (ERROR_PREFIX, Trigger::Error),
    (GOODBYE, Trigger::ShuttingDown),
];

/// Something the tunnel reported on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Connecting,
    Outdated,
    ErrorDetected(TunnelFailure),
    ShuttingDown,
}

/// An error line, kept until the process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFailure {
    InvalidCredentials(String),
    Reported(String),
}

impl TunnelFailure {
    pub fn line(&self) -> &str {
        match self {
            Self::InvalidCredentials(line) | Self::Reported(line) => line,
        }
    }
}

impl fmt::Display for TunnelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.line())
    }
}

impl From<TunnelFailure> for LaunchError {
    fn from(failure: TunnelFailure) -> Self {
        match failure {
            TunnelFailure::InvalidCredentials(line) => LaunchError::Credentials(line),
            TunnelFailure::Reported(line) => LaunchError::Tunnel(line),
        }
    }
}

/// Classifies one line of output.
pub fn classify_line(line: &str) -> Option<OutputEvent> {
    let line = line.trim();
    let (_, trigger) = TRIGGERS.iter().find(|(phrase, _)| line.contains(phrase))?;

    Some(match trigger {
        Trigger::Connecting => OutputEvent::Connecting,
        Trigger::Outdated => OutputEvent::Outdated,
        Trigger::ShuttingDown => OutputEvent::ShuttingDown,
        Trigger::Error if line.contains(INVALID_CREDENTIALS) => {
            OutputEvent::ErrorDetected(TunnelFailure::InvalidCredentials(line.to_string()))
        }
        Trigger::Error => OutputEvent::ErrorDetected(TunnelFailure::Reported(line.to_string())),
    })
}
