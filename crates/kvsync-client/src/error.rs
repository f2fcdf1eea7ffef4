//! Error types for the kvsync RESP client.

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a Redis-compatible server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred during communication.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server returned a RESP error response.
    #[error("server error: {0}")]
    Server(String),

    /// The RESP protocol data was malformed or unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response type did not match what was expected.
    #[error("unexpected response type: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// The expected type description.
        expected: &'static str,
        /// The actual type description.
        actual: String,
    },

    /// The connection to the server was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting to the server did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An invalid argument was provided (bad endpoint, empty pipeline, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns `true` when the server rejected a script hash it does not know.
    pub fn is_noscript(&self) -> bool {
        matches!(self, Error::Server(msg) if msg.starts_with("NOSCRIPT"))
    }
}
