//! Error types for kvsync
//!
//! Uses `thiserror` for ergonomic error definitions. Only
//! [`SyncError::Connection`] and [`SyncError::Config`] abort a run; page and
//! write failures are absorbed by the engine and surfaced in the report.

use std::io;
use thiserror::Error;

use crate::sync::cursor::PageError;

/// Main error type for kvsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration parsing or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An endpoint could not be reached or health-checked at startup
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error from the RESP client
    #[error("Store error: {0}")]
    Client(#[from] kvsync_client::Error),

    /// A scan page did not have the expected shape
    #[error("Malformed scan page: {0}")]
    Page(#[from] PageError),

    /// Cluster topology could not be discovered or routed
    #[error("Topology error: {0}")]
    Topology(String),

    /// Key list file could not be read
    #[error("Key file error: {0}")]
    KeyFile(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for kvsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Returns true if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Connection(_))
    }
}
