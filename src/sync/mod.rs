//! Checksum-based incremental migration engine.
//!
//! The destination is indexed first: every key's identity hash mapped to
//! the SHA-1 of its `DUMP` payload. The source is then scanned shard by
//! shard; keys whose content hash matches the index are skipped, the rest
//! are copied with `RESTORE ... REPLACE` and their remaining TTL.
//!
//! # Usage
//!
//! ```ignore
//! use kvsync::sync::{MigrationContext, SyncEngine, Topology};
//!
//! let source = Topology::connect(&config.source).await?;
//! let destination = Topology::connect(&config.destination).await?;
//! let engine = SyncEngine::new(MigrationContext::new(source, destination, config.sync));
//! let report = engine.run().await?;
//! println!("{report}");
//! ```

pub mod context;
pub mod counters;
pub mod cursor;
pub mod decision;
pub mod engine;
pub mod fingerprint;
pub mod index;
pub mod keyfile;
#[doc(hidden)]
pub mod memory;
pub mod migrator;
pub mod report;
pub mod store;
pub mod topology;

pub use context::{FailureList, MigrationContext};
pub use counters::{CounterSnapshot, RunCounters};
pub use cursor::{PageError, ScanCursor, ScanPage, ShardOutcome, ShardScanner};
pub use decision::{decide, Decision};
pub use engine::{list_keys, SyncEngine};
pub use fingerprint::{fingerprint, identity_hash, ContentHash, IdentityHash};
pub use index::ChecksumIndex;
#[doc(hidden)]
pub use memory::MemoryShard;
pub use migrator::{normalize_ttl, MigrationRecord, Migrator, PipelineBatch};
pub use report::{RunReport, ShardReport};
pub use store::{RespShard, SerializedKey, ShardStore};
pub use topology::{Shard, Topology};
