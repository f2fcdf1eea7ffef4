//! # kvsync
//!
//! Incremental key copy between Redis-compatible stores, single node or
//! cluster, on either side. Only keys whose serialized content differs at
//! the destination are transferred; values move as `DUMP` payloads with
//! their remaining TTL.
//!
//! ## Modules
//!
//! - [`config`]: TOML configuration and validation
//! - [`error`]: crate error type
//! - [`sync`]: the scan, index, decide and migrate engine

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
