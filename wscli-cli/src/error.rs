//! Error types for the wscli binary.

use std::path::PathBuf;
use thiserror::Error;
use wscli_websocket::WebSocketError;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types.
///
/// The display form is what the console prints: an upper-case context, the
/// handshake status when one is known, then the cause.
#[derive(Debug, Error)]
pub enum CliError {
    /// IO error (standard input, console)
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    /// The log file could not be opened
    #[error("FILE OPEN {}: {source}", .path.display())]
    LogFile {
        /// Path given with `--log`
        path: PathBuf,
        /// Underlying open failure
        source: std::io::Error,
    },

    /// A header line that is not a valid HTTP header
    #[error("HEADER: {0}")]
    InvalidHeader(String),

    /// A websocket operation failed
    #[error("{context}{}: {source}", status_suffix(.source))]
    WebSocket {
        /// What was being attempted, e.g. `WS DIAL`
        context: &'static str,
        /// Underlying failure
        source: WebSocketError,
    },
}

impl CliError {
    /// Wrap a websocket error with the operation it interrupted.
    pub fn websocket(context: &'static str, source: WebSocketError) -> Self {
        CliError::WebSocket { context, source }
    }
}

fn status_suffix(err: &WebSocketError) -> String {
    err.status()
        .map(|status| format!(" [{}]", status))
        .unwrap_or_default()
}
