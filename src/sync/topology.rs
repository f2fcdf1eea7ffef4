//! Shard topology of one side of the migration.
//!
//! A single node is a topology of exactly one shard that owns every slot.
//! A cluster is discovered from `CLUSTER NODES`: every healthy primary is a
//! shard. Destination writes are routed to the shard owning the key's slot.

use std::future::Future;
use std::sync::Arc;

use kvsync_client::{key_slot, parse_cluster_nodes, ClusterNode, ConnectionConfig, SlotRange};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::store::{RespShard, ShardStore};
use crate::config::EndpointConfig;
use crate::error::{Result, SyncError};

/// One shard: a node handle and the slots it owns.
#[derive(Clone)]
pub struct Shard {
    store: Arc<dyn ShardStore>,
    slots: Vec<SlotRange>,
}

impl Shard {
    /// The node handle.
    pub fn store(&self) -> &Arc<dyn ShardStore> {
        &self.store
    }

    /// Owned slot ranges.
    pub fn slots(&self) -> &[SlotRange] {
        &self.slots
    }
}

/// The shards of a store.
#[derive(Clone)]
pub struct Topology {
    shards: Vec<Shard>,
    clustered: bool,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("clustered", &self.clustered)
            .field(
                "shards",
                &self.shards.iter().map(|s| s.store.addr()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Topology {
    /// A single node acting as the only shard.
    pub fn single(store: Arc<dyn ShardStore>) -> Self {
        Self {
            shards: vec![Shard {
                store,
                slots: vec![SlotRange::full()],
            }],
            clustered: false,
        }
    }

    /// A cluster of primaries and their slot ranges.
    pub fn cluster(shards: Vec<(Arc<dyn ShardStore>, Vec<SlotRange>)>) -> Result<Self> {
        if shards.is_empty() {
            return Err(SyncError::Topology("cluster has no serving primaries".into()));
        }
        Ok(Self {
            shards: shards
                .into_iter()
                .map(|(store, slots)| Shard { store, slots })
                .collect(),
            clustered: true,
        })
    }

    /// Connect to the endpoints of one side, health-checking every node.
    ///
    /// Any unreachable node is a [`SyncError::Connection`].
    pub async fn connect(config: &EndpointConfig) -> Result<Self> {
        let timeout = config.connect_timeout();

        if !config.is_cluster() {
            let host = config
                .hosts
                .first()
                .ok_or_else(|| SyncError::Config("no hosts given".into()))?;
            let store = RespShard::connect(host, timeout)
                .await
                .map_err(|e| SyncError::Connection(format!("{}: {}", host, e)))?;
            info!(host = %host, "connected to single node");
            return Ok(Self::single(Arc::new(store)));
        }

        let nodes = discover(config).await?;
        let mut shards: Vec<(Arc<dyn ShardStore>, Vec<SlotRange>)> = Vec::new();
        for node in nodes.into_iter().filter(ClusterNode::is_serving_primary) {
            let store = RespShard::connect(&node.addr, timeout)
                .await
                .map_err(|e| SyncError::Connection(format!("{}: {}", node.addr, e)))?;
            shards.push((Arc::new(store), node.slots));
        }
        info!(primaries = shards.len(), "connected to cluster");
        Self::cluster(shards).map_err(|e| SyncError::Connection(e.to_string()))
    }

    /// All shards.
    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// `true` for a topology without shards.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// `true` when built from cluster discovery.
    pub fn is_cluster(&self) -> bool {
        self.clustered
    }

    /// Index of the shard owning `key`, or `None` if its slot is unassigned.
    pub fn route(&self, key: &[u8]) -> Option<usize> {
        if !self.clustered {
            return (!self.shards.is_empty()).then_some(0);
        }
        let slot = key_slot(key);
        self.shards
            .iter()
            .position(|shard| shard.slots.iter().any(|range| range.contains(slot)))
    }

    /// Run `work` once per shard, at most `max_concurrency` at a time.
    ///
    /// Results come back in shard order. No ordering holds between shards
    /// while they run. A panicking task is re-raised here.
    pub async fn for_each_shard<F, Fut, T>(&self, max_concurrency: usize, mut work: F) -> Vec<T>
    where
        F: FnMut(Arc<dyn ShardStore>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, shard) in self.shards.iter().enumerate() {
            let semaphore = semaphore.clone();
            let fut = work(shard.store.clone());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (idx, fut.await)
            });
        }

        let mut results: Vec<Option<T>> = (0..self.shards.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, value)) => results[idx] = Some(value),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => warn!(error = %e, "shard task cancelled"),
            }
        }
        results.into_iter().flatten().collect()
    }
}

/// Fetch `CLUSTER NODES` from the first seed that answers.
///
/// Nodes listed without a host are given the answering seed's host.
async fn discover(config: &EndpointConfig) -> Result<Vec<ClusterNode>> {
    let mut last_error = None;
    for seed in &config.hosts {
        let nodes = async {
            let seed_host = ConnectionConfig::parse(seed)?.host;
            let shard = RespShard::connect(seed, config.connect_timeout()).await?;
            let mut nodes = parse_cluster_nodes(&shard.cluster_nodes().await?);
            for node in &mut nodes {
                node.resolve_empty_host(&seed_host);
            }
            Ok::<_, SyncError>(nodes)
        }
        .await;
        match nodes {
            Ok(nodes) => return Ok(nodes),
            Err(e) => {
                warn!(seed = %seed, error = %e, "cluster seed unreachable");
                last_error = Some(format!("{}: {}", seed, e));
            }
        }
    }
    Err(SyncError::Connection(last_error.unwrap_or_else(|| {
        "no cluster seed hosts given".to_string()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::MemoryShard;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn two_shards() -> Topology {
        Topology::cluster(vec![
            (
                Arc::new(MemoryShard::new("mem:1")) as Arc<dyn ShardStore>,
                vec![SlotRange::new(0, 8191)],
            ),
            (
                Arc::new(MemoryShard::new("mem:2")) as Arc<dyn ShardStore>,
                vec![SlotRange::new(8192, 16383)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_routes_everything_to_one_shard() {
        let topology = Topology::single(Arc::new(MemoryShard::new("mem:1")));
        assert!(!topology.is_cluster());
        assert_eq!(topology.route(b"foo"), Some(0));
        assert_eq!(topology.route(b"bar"), Some(0));
    }

    #[test]
    fn test_cluster_routes_by_slot() {
        let topology = two_shards();
        // foo = 12182, bar = 5061
        assert_eq!(topology.route(b"foo"), Some(1));
        assert_eq!(topology.route(b"bar"), Some(0));
        assert_eq!(topology.route(b"{bar}.tagged"), Some(0));
    }

    #[test]
    fn test_unowned_slot_has_no_route() {
        let topology = Topology::cluster(vec![(
            Arc::new(MemoryShard::new("mem:1")) as Arc<dyn ShardStore>,
            vec![SlotRange::new(0, 100)],
        )])
        .unwrap();
        assert_eq!(topology.route(b"foo"), None);
    }

    #[test]
    fn test_empty_cluster_rejected() {
        assert!(matches!(
            Topology::cluster(Vec::new()),
            Err(SyncError::Topology(_))
        ));
    }

    #[tokio::test]
    async fn test_for_each_shard_runs_once_per_shard_in_order() {
        let topology = two_shards();
        let addrs = topology
            .for_each_shard(4, |store| async move { store.addr().to_string() })
            .await;
        assert_eq!(addrs, vec!["mem:1", "mem:2"]);
    }

    #[tokio::test]
    async fn test_for_each_shard_bounds_concurrency() {
        let shards = (0..6)
            .map(|i| {
                (
                    Arc::new(MemoryShard::new(format!("mem:{i}"))) as Arc<dyn ShardStore>,
                    vec![SlotRange::full()],
                )
            })
            .collect();
        let topology = Topology::cluster(shards).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        topology
            .for_each_shard(2, |_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_single_node_is_fatal() {
        let config = EndpointConfig {
            hosts: vec!["127.0.0.1:1".into()],
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let err = Topology::connect(&config).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
