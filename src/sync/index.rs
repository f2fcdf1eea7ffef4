//! Destination checksum index.
//!
//! Built once, before any source key is examined, by scanning every
//! destination shard to completion. Maps the identity hash of each key name
//! to the content hash of its value. After the build it is only read.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::cursor::ShardScanner;
use super::fingerprint::{identity_hash, ContentHash, IdentityHash};
use super::report::ShardReport;
use super::topology::Topology;
use crate::config::SyncConfig;

/// `identity_hash(key) -> content hash` for every destination key.
#[derive(Debug, Default)]
pub struct ChecksumIndex {
    entries: DashMap<IdentityHash, ContentHash>,
}

impl ChecksumIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a destination key. Vanished keys (empty hash) are not indexed.
    pub fn insert(&self, key: &[u8], hash: ContentHash) {
        if hash.is_empty() {
            return;
        }
        self.entries.insert(identity_hash(key), hash);
    }

    /// Content hash recorded for `key`.
    pub fn get(&self, key: &[u8]) -> Option<ContentHash> {
        self.entries
            .get(&identity_hash(key))
            .map(|entry| entry.value().clone())
    }

    /// `true` when `key` is indexed with exactly `hash`.
    pub fn matches(&self, key: &[u8], hash: &ContentHash) -> bool {
        self.entries
            .get(&identity_hash(key))
            .is_some_and(|entry| entry.value() == hash)
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan every destination shard to completion and index what it holds.
    ///
    /// Shards are walked concurrently; each logs its progress after every
    /// page. A shard whose scan fails leaves the index incomplete, which
    /// only causes extra copies.
    pub async fn build(
        destination: &Topology,
        options: &SyncConfig,
    ) -> (Arc<ChecksumIndex>, Vec<ShardReport>) {
        let index = Arc::new(ChecksumIndex::new());
        let page_size = options.page_size;
        let pattern = options.match_pattern().map(str::to_string);

        let reports = destination
            .for_each_shard(options.max_concurrent_shards, |store| {
                let index = index.clone();
                let pattern = pattern.clone();
                async move {
                    let mut scanner =
                        ShardScanner::new(store.clone(), page_size, pattern.as_deref());
                    while let Some(page) = scanner.next_page().await {
                        for (key, hash) in page.into_entries() {
                            index.insert(&key, hash);
                        }
                        info!(
                            shard = store.addr(),
                            indexed = index.len(),
                            cursor = %scanner.cursor(),
                            "Loaded destination checksum keys"
                        );
                    }
                    ShardReport::new(store.addr(), scanner.into_outcome())
                }
            })
            .await;

        info!(indexed = index.len(), "Destination checksum index built");
        (index, reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::MemoryShard;
    use crate::sync::store::ShardStore;
    use kvsync_client::SlotRange;

    #[test]
    fn test_insert_and_lookup() {
        let index = ChecksumIndex::new();
        index.insert(b"a", ContentHash::new("00ff"));
        index.insert(b"gone", ContentHash::new(""));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(b"a"), Some(ContentHash::new("00ff")));
        assert!(index.matches(b"a", &ContentHash::new("00FF")));
        assert!(!index.matches(b"b", &ContentHash::new("00ff")));
        assert_eq!(index.get(b"gone"), None);
    }

    #[tokio::test]
    async fn test_build_covers_all_shards() {
        let left = Arc::new(MemoryShard::new("mem:1"));
        let right = Arc::new(MemoryShard::new("mem:2"));
        for i in 0..30 {
            left.set(format!("left:{i}"), "l");
            right.set(format!("right:{i}"), "r");
        }
        let topology = Topology::cluster(vec![
            (left.clone() as Arc<dyn ShardStore>, vec![SlotRange::new(0, 8191)]),
            (right.clone() as Arc<dyn ShardStore>, vec![SlotRange::new(8192, 16383)]),
        ])
        .unwrap();
        let options = SyncConfig {
            page_size: 7,
            ..Default::default()
        };

        let (index, reports) = ChecksumIndex::build(&topology, &options).await;
        assert_eq!(index.len(), 60);
        assert_eq!(
            index.get(b"left:3"),
            left.content_hash(b"left:3").await.unwrap()
        );
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome.is_complete()));
        assert_eq!(reports[1].addr, "mem:2");
    }

    #[tokio::test]
    async fn test_build_honours_filter() {
        let shard = Arc::new(MemoryShard::new("mem:1"));
        shard.set("user:1", "a");
        shard.set("order:1", "b");
        let options = SyncConfig {
            key_filter: "user:*".into(),
            ..Default::default()
        };

        let (index, _) = ChecksumIndex::build(&Topology::single(shard), &options).await;
        assert_eq!(index.len(), 1);
        assert!(index.get(b"order:1").is_none());
    }
}
