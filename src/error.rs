use thiserror::Error;

use crate::raw::Status;

#[derive(Debug, Error)]
pub enum CrunchError {
    /// Malformed command message or unknown command name.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Non-success status from prepare, step or finalize.
    ///
    /// `code` is the engine's description of the status (`sqlite3_errstr`) and
    /// `message` is the connection's last error text (`sqlite3_errmsg`).
    #[error("{code}: {message}")]
    SqlError {
        status: Status,
        code: String,
        message: String,
    },

    #[error("Unknown column type {0}")]
    TypeError(i32),

    #[error("Lifecycle misuse: {0}")]
    MisuseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl CrunchError {
    /// The engine status behind a `SqlError`, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            CrunchError::SqlError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        CrunchError::MisuseError(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        CrunchError::ProtocolError(message.into())
    }
}
