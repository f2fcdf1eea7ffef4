//! Per-shard cursor scanning.
//!
//! A shard is enumerated page by page. Each page is one server-side call that
//! returns the next cursor, the key names and a content hash per key. The
//! raw reply is validated once into a [`ScanPage`]; the rest of the engine
//! only ever sees the typed form.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use kvsync_client::Value;
use serde::Serialize;
use tracing::{debug, warn};

use super::fingerprint::ContentHash;
use super::store::ShardStore;

/// Opaque scan progress token. `"0"` both starts and ends a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScanCursor(String);

impl ScanCursor {
    /// The start/terminal sentinel.
    pub const START: &'static str = "0";

    /// Cursor that begins a fresh scan.
    pub fn start() -> Self {
        Self(Self::START.to_string())
    }

    /// Wrap a cursor received from the store. Only decimal digits are valid.
    pub fn parse(raw: &str) -> Result<Self, PageError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PageError::BadCursor(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// `true` once the store reports the scan is complete.
    pub fn is_terminal(&self) -> bool {
        self.0 == Self::START
    }

    /// The cursor text as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scan reply that does not have the `{cursor, keys, hashes}` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    /// The reply was not an array.
    #[error("expected array reply, got {0}")]
    NotArray(&'static str),

    /// The reply array did not hold exactly three elements.
    #[error("expected 3 elements, got {0}")]
    WrongArity(usize),

    /// The cursor element was missing or not decimal.
    #[error("invalid cursor {0:?}")]
    BadCursor(String),

    /// A key or hash list element had the wrong type.
    #[error("invalid {list} entry at index {index}")]
    BadEntry {
        /// `"keys"` or `"hashes"`.
        list: &'static str,
        /// Position in the list.
        index: usize,
    },

    /// Keys and hashes do not pair up.
    #[error("{keys} keys but {hashes} hashes")]
    LengthMismatch {
        /// Number of keys.
        keys: usize,
        /// Number of hashes.
        hashes: usize,
    },
}

/// One validated scan page. `keys[i]` pairs with `content_hashes[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next request; terminal when the shard is exhausted.
    pub next_cursor: ScanCursor,
    /// Key names in this page.
    pub keys: Vec<Bytes>,
    /// Content hash per key; empty when the key vanished mid-page.
    pub content_hashes: Vec<ContentHash>,
}

impl ScanPage {
    /// Validate a raw `{cursor, keys, hashes}` reply.
    pub fn from_value(value: Value) -> Result<Self, PageError> {
        let type_name = value.type_name();
        let Value::Array(parts) = value else {
            return Err(PageError::NotArray(type_name));
        };
        let [cursor, keys, hashes]: [Value; 3] = parts
            .try_into()
            .map_err(|parts: Vec<Value>| PageError::WrongArity(parts.len()))?;

        let cursor = match cursor.as_str() {
            Some(raw) => ScanCursor::parse(raw)?,
            None => return Err(PageError::BadCursor(cursor.to_string())),
        };
        let keys = string_list(keys, "keys")?;
        let hashes = string_list(hashes, "hashes")?;
        if keys.len() != hashes.len() {
            return Err(PageError::LengthMismatch {
                keys: keys.len(),
                hashes: hashes.len(),
            });
        }

        let content_hashes = hashes
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                std::str::from_utf8(&raw)
                    .map(ContentHash::new)
                    .map_err(|_| PageError::BadEntry {
                        list: "hashes",
                        index,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            next_cursor: cursor,
            keys,
            content_hashes,
        })
    }

    /// Number of keys in the page.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` for a page with no keys (SCAN may return these mid-scan).
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Consume the page into `(key, content hash)` pairs.
    pub fn into_entries(self) -> impl Iterator<Item = (Bytes, ContentHash)> {
        self.keys.into_iter().zip(self.content_hashes)
    }
}

fn string_list(value: Value, list: &'static str) -> Result<Vec<Bytes>, PageError> {
    let Value::Array(items) = value else {
        return Err(PageError::BadEntry { list, index: 0 });
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(bytes) => Ok(bytes),
            Value::Status(text) => Ok(Bytes::from(text)),
            _ => Err(PageError::BadEntry { list, index }),
        })
        .collect()
}

/// How far a shard scan got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardOutcome {
    /// The cursor returned to the terminal sentinel.
    Complete {
        /// Pages fetched.
        pages: u64,
        /// Keys seen.
        keys: u64,
    },
    /// Some pages were processed before a page request failed.
    PartialAtCursor {
        /// Cursor of the request that failed; the scan could resume here.
        cursor: ScanCursor,
        /// Pages fetched before the failure.
        pages: u64,
        /// Keys seen before the failure.
        keys: u64,
        /// Failure description.
        reason: String,
    },
    /// The very first page failed.
    Failed {
        /// Failure description.
        reason: String,
    },
}

impl ShardOutcome {
    /// `true` for full coverage.
    pub fn is_complete(&self) -> bool {
        matches!(self, ShardOutcome::Complete { .. })
    }
}

/// Drives one shard's scan loop.
///
/// Pages are strictly sequential: each request needs the previous page's
/// cursor. A failed request ends the scan; it is never retried.
pub struct ShardScanner {
    store: Arc<dyn ShardStore>,
    cursor: ScanCursor,
    page_size: usize,
    pattern: Option<String>,
    pages: u64,
    keys: u64,
    finished: bool,
    failure: Option<String>,
}

impl ShardScanner {
    /// Scanner positioned at the start of `store`.
    pub fn new(store: Arc<dyn ShardStore>, page_size: usize, pattern: Option<&str>) -> Self {
        Self {
            store,
            cursor: ScanCursor::start(),
            page_size,
            pattern: pattern.map(str::to_string),
            pages: 0,
            keys: 0,
            finished: false,
            failure: None,
        }
    }

    /// Current cursor: the one the next request will send.
    pub fn cursor(&self) -> &ScanCursor {
        &self.cursor
    }

    /// Fetch the next page, or `None` once the scan is over.
    pub async fn next_page(&mut self) -> Option<ScanPage> {
        if self.finished {
            return None;
        }

        let result = self
            .store
            .scan_page(&self.cursor, self.page_size, self.pattern.as_deref())
            .await;

        match result {
            Ok(page) => {
                self.pages += 1;
                self.keys += page.len() as u64;
                self.cursor = page.next_cursor.clone();
                if self.cursor.is_terminal() {
                    debug!(shard = self.store.addr(), pages = self.pages, "scan complete");
                    self.finished = true;
                }
                Some(page)
            }
            Err(e) => {
                warn!(
                    shard = self.store.addr(),
                    cursor = %self.cursor,
                    error = %e,
                    "scan page failed, ending shard scan early"
                );
                self.failure = Some(e.to_string());
                self.finished = true;
                None
            }
        }
    }

    /// Final coverage for this shard.
    pub fn into_outcome(self) -> ShardOutcome {
        match self.failure {
            Some(reason) if self.pages == 0 => ShardOutcome::Failed { reason },
            Some(reason) => ShardOutcome::PartialAtCursor {
                cursor: self.cursor,
                pages: self.pages,
                keys: self.keys,
                reason,
            },
            None if self.finished => ShardOutcome::Complete {
                pages: self.pages,
                keys: self.keys,
            },
            None => ShardOutcome::PartialAtCursor {
                cursor: self.cursor,
                pages: self.pages,
                keys: self.keys,
                reason: "scan stopped before completion".to_string(),
            },
        }
    }
}
