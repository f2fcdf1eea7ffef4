//! # kvsync-client
//!
//! A small async RESP2 client for Redis-compatible servers, carrying only
//! what the kvsync engine needs: single round trips, pipelines, a `PING`
//! health check, `CLUSTER NODES` parsing and hash-slot routing.
//!
//! ```ignore
//! use kvsync_client::{Connection, ConnectionConfig};
//!
//! let mut conn = Connection::connect(&ConnectionConfig::parse("127.0.0.1:6379")?).await?;
//! conn.ping().await?;
//! ```

#![forbid(unsafe_code)]

pub mod cluster;
pub mod connection;
pub mod error;
pub mod resp;
pub mod slot;
pub mod types;

pub use cluster::{parse_cluster_nodes, ClusterNode, NodeRole};
pub use connection::{Connection, ConnectionConfig};
pub use error::{Error, Result};
pub use slot::{key_slot, SlotRange, CLUSTER_SLOTS};
pub use types::Value;
