//! Crate-wide error type
//!
//! Errors are values with a kind and a message. They surface at the session
//! boundary, where they are logged exactly once; they never cross sessions.

use thiserror::Error;

/// Error type for all server operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad id, bad style, unknown API path, missing field
    #[error("validation: {0}")]
    Validation(String),

    /// Admission refused: blocked channel, wrong stream key, resource in
    /// use, license caps exceeded
    #[error("admission: {0}")]
    Admission(String),

    /// Entity exists but is in the wrong state for the operation
    #[error("state: {0}")]
    State(String),

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Wire framing violation: short read, bad FourCC, length mismatch
    #[error("framing: {0}")]
    Framing(String),

    /// Startup configuration failure (fatal)
    #[error("config: {0}")]
    Config(String),

    /// Transport I/O failure
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket failure on a dialed (client) connection
    #[error("websocket: {0}")]
    WsClient(#[from] tokio_tungstenite::tungstenite::Error),

    /// WebSocket failure on an accepted (server) connection
    #[error("websocket: {0}")]
    WsServer(#[from] axum::Error),

    /// HTTP client failure (bridge resource listing)
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode failure
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A read or write missed its deadline
    #[error("deadline elapsed")]
    Timeout,

    /// The peer closed the connection
    #[error("connection closed")]
    Closed,
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that end a session without being worth a warning
    /// (ordinary disconnects and idle timeouts).
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::Timeout | Error::Closed)
    }
}
