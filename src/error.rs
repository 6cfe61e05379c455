//! Errors surfaced by a batch run.
//!
//! None of these carry credentials. Anything printed from here is safe to show the operator.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while running a batch.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote command ran and exited nonzero.
    #[error("command \"{command}\" failed on host \"{host}\" (status = {status})")]
    RemoteCommandFailure {
        host: String,
        command: String,
        status: i32,
    },

    /// No expected interaction was observed within the time budget.
    #[error(
        "command \"{command}\" timed out on host \"{host}\" after {} seconds",
        .timeout.as_secs()
    )]
    SessionTimeout {
        host: String,
        command: String,
        timeout: Duration,
    },

    /// Every host exited zero, but their output was not identical.
    #[error("output differs on hosts: {}", .hosts.join(", "))]
    VerificationMismatch { hosts: Vec<String> },

    /// The request cannot be dispatched at all. Raised before contacting any host.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The transport ended before a terminal pattern matched.
    #[error("stream closed unexpectedly while running \"{command}\" on host \"{host}\"")]
    StreamClosedUnexpectedly { host: String, command: String },

    /// The transport process could not be started or talked to.
    #[error("cannot run \"{command}\" on host \"{host}\": {source}")]
    Transport {
        host: String,
        command: String,
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for [Error::Configuration].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
