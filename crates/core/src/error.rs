//! Error model shared by store adapters and the components built on them.

use thiserror::Error;

/// Result type returned by store adapter calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level error.
///
/// These are **transient unavailability** failures: the store could not be
/// reached, rejected a command, or the connection was already released.
/// They are surfaced to the caller as-is. Only the initial connect retries;
/// individual commands never do.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connect, I/O, dropped connection).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("store command error: {0}")]
    Command(String),

    /// The connection backing this handle has already been closed.
    #[error("store connection closed")]
    Closed,
}

impl StoreError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }
}

/// A record could not be encoded to, or decoded from, its stored bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode {record}: {reason}")]
    Encode { record: &'static str, reason: String },

    #[error("failed to decode {record}: {reason}")]
    Decode { record: &'static str, reason: String },
}
