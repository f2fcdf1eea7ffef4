//! In-memory shard store.
//!
//! Behaves like one Redis node as far as the engine can tell: cursor paging,
//! glob filters, a stable `DUMP`-like serialization and `RESTORE ... REPLACE`.
//! Faults can be injected for scans and writes. Test support only; hidden
//! from the public docs.

use std::collections::{BTreeMap, HashSet};

use bytes::{BufMut, Bytes, BytesMut};
use kvsync_client::{Error as ClientError, Value};
use parking_lot::Mutex;

use super::cursor::{ScanCursor, ScanPage};
use super::fingerprint::{fingerprint, ContentHash};
use super::migrator::MigrationRecord;
use super::store::{SerializedKey, ShardStore};
use crate::error::{Result, SyncError};

/// Serialization version byte.
const DUMP_VERSION: u8 = 0x0b;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    pttl_ms: i64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<Bytes, Entry>,
    scan_budget: Option<usize>,
    flush_fails: bool,
    rejected: HashSet<Bytes>,
    flushes: Vec<usize>,
    direct_writes: usize,
    scan_requests: usize,
}

/// A single in-memory node.
#[derive(Debug)]
pub struct MemoryShard {
    addr: String,
    state: Mutex<State>,
}

impl MemoryShard {
    /// Empty shard reported under `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Set a string key with no expiry.
    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.set_with_pttl(key, value, -1);
    }

    /// Set a key with a raw `PTTL` reading; negative means no expiry.
    pub fn set_with_pttl(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, pttl_ms: i64) {
        self.state.lock().entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                pttl_ms,
            },
        );
    }

    /// Value of `key`.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.state.lock().entries.get(key).map(|e| e.value.clone())
    }

    /// Raw `PTTL` of `key`: `-1` for no expiry.
    pub fn pttl(&self, key: &[u8]) -> Option<i64> {
        self.state.lock().entries.get(key).map(|e| e.pttl_ms)
    }

    /// Remove `key`.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// `true` when the shard holds no keys.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Serve `pages` scan pages, then fail every later page request.
    pub fn fail_scan_after(&self, pages: usize) {
        self.state.lock().scan_budget = Some(pages);
    }

    /// Fail every pipelined write group as a transport error.
    pub fn fail_flushes(&self) {
        self.state.lock().flush_fails = true;
    }

    /// Answer writes of `key` with an error reply.
    pub fn reject_restore(&self, key: impl Into<Bytes>) {
        self.state.lock().rejected.insert(key.into());
    }

    /// Size of every pipelined write group received, in order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.state.lock().flushes.clone()
    }

    /// Number of scan page requests received, failed ones included.
    pub fn scan_requests(&self) -> usize {
        self.state.lock().scan_requests
    }

    /// Number of single (unpipelined) writes received.
    pub fn direct_writes(&self) -> usize {
        self.state.lock().direct_writes
    }

    fn write(state: &mut State, record: &MigrationRecord) -> std::result::Result<(), String> {
        if state.rejected.contains(&record.key) {
            return Err("ERR rejected by test shard".to_string());
        }
        let value = undump(&record.payload)
            .ok_or_else(|| "ERR DUMP payload version or checksum are wrong".to_string())?;
        let pttl_ms = match record.ttl_ms {
            0 => -1,
            ttl => i64::try_from(ttl).unwrap_or(i64::MAX),
        };
        state
            .entries
            .insert(record.key.clone(), Entry { value, pttl_ms });
        Ok(())
    }
}

/// Serialize a value: version byte, length, value bytes, trailer.
fn dump(value: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(value.len() + 7);
    out.put_u8(DUMP_VERSION);
    out.put_u32(value.len() as u32);
    out.put_slice(value);
    out.put_u16(0x0a00);
    out.freeze()
}

fn undump(payload: &[u8]) -> Option<Bytes> {
    let (&version, rest) = payload.split_first()?;
    if version != DUMP_VERSION || rest.len() < 6 {
        return None;
    }
    let (len, rest) = rest.split_at(4);
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    if rest.len() != len + 2 || rest[len..] != [0x0a, 0x00] {
        return None;
    }
    Some(Bytes::copy_from_slice(&rest[..len]))
}

/// Redis-style glob match: `*`, `?`, `[set]`, `[^set]`, `[a-z]` and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `c` against the class opening at `pattern[start]`. Returns whether
/// it matched and the index just past `]`, or `None` for an unclosed class.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }
    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

fn bulk(bytes: impl Into<Bytes>) -> Value {
    Value::String(bytes.into())
}

#[async_trait::async_trait]
impl ShardStore for MemoryShard {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn scan_page(
        &self,
        cursor: &ScanCursor,
        count: usize,
        pattern: Option<&str>,
    ) -> Result<ScanPage> {
        let mut state = self.state.lock();
        state.scan_requests += 1;
        if let Some(budget) = state.scan_budget.as_mut() {
            if *budget == 0 {
                return Err(SyncError::Client(ClientError::ConnectionClosed));
            }
            *budget -= 1;
        }

        let start: usize = cursor.as_str().parse().unwrap_or(0);
        let end = start.saturating_add(count.max(1));
        let mut keys = Vec::new();
        let mut hashes = Vec::new();
        for (key, entry) in state.entries.iter().skip(start).take(end - start) {
            if pattern.is_some_and(|p| !glob_match(p.as_bytes(), key)) {
                continue;
            }
            keys.push(bulk(key.clone()));
            hashes.push(bulk(fingerprint(&dump(&entry.value)).as_str().to_string()));
        }
        let next = if end >= state.entries.len() {
            ScanCursor::START.to_string()
        } else {
            end.to_string()
        };

        // Same reply shape the scan script produces on a real node.
        let reply = Value::Array(vec![bulk(next), Value::Array(keys), Value::Array(hashes)]);
        Ok(ScanPage::from_value(reply)?)
    }

    async fn content_hash(&self, key: &[u8]) -> Result<Option<ContentHash>> {
        Ok(self
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| fingerprint(&dump(&entry.value))))
    }

    async fn dump_with_ttl(&self, key: &[u8]) -> Result<Option<SerializedKey>> {
        Ok(self
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| SerializedKey {
                payload: dump(&entry.value),
                pttl_ms: entry.pttl_ms,
            }))
    }

    async fn restore(&self, record: &MigrationRecord) -> Result<()> {
        let mut state = self.state.lock();
        state.direct_writes += 1;
        Self::write(&mut state, record)
            .map_err(|msg| SyncError::Client(ClientError::Server(msg)))
    }

    async fn restore_batch(
        &self,
        records: &[MigrationRecord],
    ) -> Result<Vec<std::result::Result<(), String>>> {
        let mut state = self.state.lock();
        state.flushes.push(records.len());
        if state.flush_fails {
            return Err(SyncError::Client(ClientError::ConnectionClosed));
        }
        Ok(records
            .iter()
            .map(|record| Self::write(&mut state, record))
            .collect())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .state
            .lock()
            .entries
            .keys()
            .filter(|key| glob_match(pattern.as_bytes(), key))
            .cloned()
            .collect())
    }
}
