//! The shard seam.
//!
//! [`ShardStore`] is everything the engine needs from one node: scan pages
//! with content hashes, single-key hashes, serialized payloads with their
//! TTL, and replace-restores. [`RespShard`] implements it over a RESP
//! connection; [`crate::sync::memory::MemoryShard`] implements it in memory.

use std::time::Duration;

use bytes::Bytes;
use kvsync_client::{Connection, ConnectionConfig, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::cursor::{ScanCursor, ScanPage};
use super::fingerprint::{sha1_hex, ContentHash};
use super::migrator::MigrationRecord;
use crate::error::Result;

/// Server-side page scan: SCAN one page, then DUMP and hash every key.
/// A key that vanishes between SCAN and DUMP gets an empty hash.
const SCAN_PAGE_SCRIPT: &str = r#"
local result
if ARGV[3] then
  result = redis.call('SCAN', ARGV[1], 'COUNT', ARGV[2], 'MATCH', ARGV[3])
else
  result = redis.call('SCAN', ARGV[1], 'COUNT', ARGV[2])
end
local keys = result[2]
local hashes = {}
for i = 1, #keys do
  local payload = redis.call('DUMP', keys[i])
  if payload then
    hashes[i] = redis.sha1hex(payload)
  else
    hashes[i] = ''
  end
end
return {result[1], keys, hashes}
"#;

/// Content hash of one key, or nil when it does not exist.
const KEY_HASH_SCRIPT: &str = r#"
local payload = redis.call('DUMP', KEYS[1])
if payload then
  return redis.sha1hex(payload)
end
return false
"#;

/// A key's `DUMP` payload and its raw `PTTL` reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedKey {
    /// Opaque serialized value.
    pub payload: Bytes,
    /// Remaining TTL in milliseconds; negative means no expiry (or expired).
    pub pttl_ms: i64,
}

/// One node of a store, as seen by the sync engine.
#[async_trait::async_trait]
pub trait ShardStore: Send + Sync {
    /// Address used in logs and reports.
    fn addr(&self) -> &str;

    /// Fetch one scan page with a content hash per key.
    async fn scan_page(
        &self,
        cursor: &ScanCursor,
        count: usize,
        pattern: Option<&str>,
    ) -> Result<ScanPage>;

    /// Content hash of a single key, `None` when it does not exist.
    async fn content_hash(&self, key: &[u8]) -> Result<Option<ContentHash>>;

    /// Serialized payload and TTL, `None` when the key does not exist.
    async fn dump_with_ttl(&self, key: &[u8]) -> Result<Option<SerializedKey>>;

    /// Write one record, replacing any existing value.
    async fn restore(&self, record: &MigrationRecord) -> Result<()>;

    /// Write a group of records as one pipelined request.
    ///
    /// The outer error means the whole group failed; otherwise there is one
    /// acknowledgement per record, in order.
    async fn restore_batch(
        &self,
        records: &[MigrationRecord],
    ) -> Result<Vec<std::result::Result<(), String>>>;

    /// Every key on this node matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<Bytes>>;
}

/// A Lua script addressed by its SHA-1.
struct Script {
    source: &'static str,
    sha: String,
}

impl Script {
    fn new(source: &'static str) -> Self {
        Self {
            source,
            sha: sha1_hex(source.as_bytes()),
        }
    }
}

/// A single RESP node.
///
/// A connection broken by a transport or framing error is replaced on the
/// next request, so one bad reply costs one request rather than the shard.
pub struct RespShard {
    addr: String,
    config: ConnectionConfig,
    conn: Mutex<Connection>,
    scan_page: Script,
    key_hash: Script,
}

impl std::fmt::Debug for RespShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespShard").field("addr", &self.addr).finish()
    }
}

impl RespShard {
    /// Connect to `endpoint` and health-check it with `PING`.
    pub async fn connect(endpoint: &str, timeout: Duration) -> Result<Self> {
        let config = ConnectionConfig::parse(endpoint)?.with_connect_timeout(timeout);
        let mut conn = Connection::connect(&config).await?;
        conn.ping().await?;
        Ok(Self::new(conn, config))
    }

    /// Wrap an established connection; `config` is used to reconnect.
    pub fn new(conn: Connection, config: ConnectionConfig) -> Self {
        Self {
            addr: conn.addr().to_string(),
            config,
            conn: Mutex::new(conn),
            scan_page: Script::new(SCAN_PAGE_SCRIPT),
            key_hash: Script::new(KEY_HASH_SCRIPT),
        }
    }

    /// Lock the connection, reopening it first if it is broken.
    async fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        let mut conn = self.conn.lock().await;
        if conn.is_broken() {
            warn!(shard = %self.addr, "reconnecting after a broken connection");
            *conn = Connection::connect(&self.config).await?;
        }
        Ok(conn)
    }

    /// Raw `CLUSTER NODES` output.
    pub async fn cluster_nodes(&self) -> Result<String> {
        let reply = self
            .connection()
            .await?
            .execute(&[Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"NODES")])
            .await?;
        let bytes = reply.into_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// `EVALSHA`, falling back to `EVAL` when the server has not cached the
    /// script yet. `EVAL` caches it for the next call.
    async fn eval(&self, script: &Script, keys: &[Bytes], args: &[Bytes]) -> Result<Value> {
        let mut command = Vec::with_capacity(3 + keys.len() + args.len());
        command.push(Bytes::from_static(b"EVALSHA"));
        command.push(Bytes::from(script.sha.clone()));
        command.push(Bytes::from(keys.len().to_string()));
        command.extend_from_slice(keys);
        command.extend_from_slice(args);

        let mut conn = self.connection().await?;
        match conn.execute(&command).await {
            Err(e) if e.is_noscript() => {
                debug!(shard = %self.addr, sha = %script.sha, "script not cached, sending EVAL");
                command[0] = Bytes::from_static(b"EVAL");
                command[1] = Bytes::from_static(script.source.as_bytes());
                Ok(conn.execute(&command).await?)
            }
            other => Ok(other?),
        }
    }
}

fn restore_command(record: &MigrationRecord) -> Vec<Bytes> {
    vec![
        Bytes::from_static(b"RESTORE"),
        record.key.clone(),
        Bytes::from(record.ttl_ms.to_string()),
        record.payload.clone(),
        Bytes::from_static(b"REPLACE"),
    ]
}

#[async_trait::async_trait]
impl ShardStore for RespShard {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn scan_page(
        &self,
        cursor: &ScanCursor,
        count: usize,
        pattern: Option<&str>,
    ) -> Result<ScanPage> {
        let mut args = vec![
            Bytes::copy_from_slice(cursor.as_str().as_bytes()),
            Bytes::from(count.to_string()),
        ];
        if let Some(pattern) = pattern {
            args.push(Bytes::copy_from_slice(pattern.as_bytes()));
        }
        let reply = self.eval(&self.scan_page, &[], &args).await?;
        Ok(ScanPage::from_value(reply)?)
    }

    async fn content_hash(&self, key: &[u8]) -> Result<Option<ContentHash>> {
        let reply = self
            .eval(&self.key_hash, &[Bytes::copy_from_slice(key)], &[])
            .await?;
        if reply.is_nil() {
            return Ok(None);
        }
        let raw = reply.into_bytes()?;
        Ok(Some(ContentHash::new(String::from_utf8_lossy(&raw))))
    }

    async fn dump_with_ttl(&self, key: &[u8]) -> Result<Option<SerializedKey>> {
        let key = Bytes::copy_from_slice(key);
        let commands = [
            vec![Bytes::from_static(b"DUMP"), key.clone()],
            vec![Bytes::from_static(b"PTTL"), key],
        ];
        let mut replies = self.connection().await?.pipeline(&commands).await?.into_iter();

        let dump = replies.next().unwrap_or(Value::Nil).into_result()?;
        let pttl = replies.next().unwrap_or(Value::Nil).into_result()?;
        if dump.is_nil() {
            return Ok(None);
        }
        Ok(Some(SerializedKey {
            payload: dump.into_bytes()?,
            pttl_ms: pttl.into_integer()?,
        }))
    }

    async fn restore(&self, record: &MigrationRecord) -> Result<()> {
        self.connection()
            .await?
            .execute(&restore_command(record))
            .await?;
        Ok(())
    }

    async fn restore_batch(
        &self,
        records: &[MigrationRecord],
    ) -> Result<Vec<std::result::Result<(), String>>> {
        let commands: Vec<Vec<Bytes>> = records.iter().map(restore_command).collect();
        let replies = self.connection().await?.pipeline(&commands).await?;
        Ok(replies
            .into_iter()
            .map(|reply| match reply {
                Value::Error(msg) => Err(msg),
                _ => Ok(()),
            })
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<Bytes>> {
        let reply = self
            .connection()
            .await?
            .execute(&[
                Bytes::from_static(b"KEYS"),
                Bytes::copy_from_slice(pattern.as_bytes()),
            ])
            .await?;
        reply
            .into_array()?
            .into_iter()
            .map(|key| Ok(key.into_bytes()?))
            .collect()
    }
}
