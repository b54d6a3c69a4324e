//! Error types for WebSocket operations.

use http::StatusCode;
use thiserror::Error;

/// WebSocket error type.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Operation attempted without a live connection
    #[error("nil websocket connection")]
    NilConnection,

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] tungstenite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake was answered with a non-upgrade HTTP response
    #[error("Handshake rejected with HTTP status {status}")]
    Rejected {
        /// Status line returned by the server
        status: StatusCode,
    },

    /// Connection closed locally
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer sent a close frame
    #[error("Connection closed by peer ({code}): {reason}")]
    PeerClosed {
        /// Close code (1005 when the frame carried none)
        code: u16,
        /// Close reason
        reason: String,
    },

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),

    /// Text frame payload that is not valid UTF-8
    #[error("Text payload is not valid UTF-8: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    /// A read or write deadline expired
    #[error("Operation timed out")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Header name or value rejected by the handshake request
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A pump task ended abnormally
    #[error("Pump task failed: {0}")]
    Task(String),
}

impl WebSocketError {
    /// HTTP status attached to a failed handshake, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            WebSocketError::Rejected { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error only reports that the connection is gone.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            WebSocketError::ConnectionClosed
                | WebSocketError::PeerClosed { .. }
                | WebSocketError::Protocol(tungstenite::Error::ConnectionClosed)
                | WebSocketError::Protocol(tungstenite::Error::AlreadyClosed)
        )
    }
}

/// Result type for WebSocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;
