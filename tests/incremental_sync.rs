//! End-to-end runs of the sync engine against in-memory topologies.

mod common;

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use common::*;
use kvsync::config::{SyncConfig, WriteMode};
use kvsync::sync::{MemoryShard, ShardOutcome, ShardStore, Topology};
use kvsync_client::SlotRange;

fn value(s: &str) -> Option<Bytes> {
    Some(Bytes::copy_from_slice(s.as_bytes()))
}

fn key_file(keys: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for key in keys {
        writeln!(file, "{key}").unwrap();
    }
    file
}

// ============================================================================
// Single node
// ============================================================================

#[tokio::test]
async fn test_empty_destination_receives_everything() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set("a", "1");
    source.set("b", "2");

    let report = engine(source_topology, dest_topology, SyncConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 2);
    assert_eq!(report.counters.skipped, 0);
    assert_eq!(dest.get(b"a"), value("1"));
    assert_eq!(dest.get(b"b"), value("2"));
    assert_eq!(report.to_string(), "Migrated 2 keys, Skipped 0");
}

#[tokio::test]
async fn test_matching_key_is_skipped() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set("a", "1");
    source.set("b", "2");
    dest.set("a", "1");

    let report = engine(source_topology, dest_topology, SyncConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 1);
    assert_eq!(report.counters.skipped, 1);
    assert_eq!(report.indexed_keys, 1);
    assert_eq!(dest.get(b"b"), value("2"));
}

#[tokio::test]
async fn test_negative_ttls_restore_without_expiry() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set_with_pttl("c", "3", -1);
    source.set_with_pttl("d", "4", -1_000_000);
    source.set_with_pttl("e", "5", 5000);

    engine(source_topology, dest_topology, SyncConfig::default())
        .run()
        .await
        .unwrap();

    assert_eq!(dest.get(b"c"), value("3"));
    assert_eq!(dest.pttl(b"c"), Some(-1));
    assert_eq!(dest.pttl(b"d"), Some(-1));
    assert_eq!(dest.pttl(b"e"), Some(5000));
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let (source, source_topology) = single("src");
    let (_dest, dest_topology) = single("dst");
    for i in 0..40 {
        source.set(format!("key:{i}"), format!("value:{i}"));
    }

    let first = engine(source_topology.clone(), dest_topology.clone(), small_pages())
        .run()
        .await
        .unwrap();
    assert_eq!(first.counters.migrated, 40);

    let second = engine(source_topology, dest_topology, small_pages())
        .run()
        .await
        .unwrap();
    assert_eq!(second.counters.migrated, 0);
    assert_eq!(second.counters.skipped, 40);
    assert_eq!(second.indexed_keys, 40);
}

#[tokio::test]
async fn test_direct_mode() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    for i in 0..12 {
        source.set(format!("k{i}"), "v");
    }
    let options = SyncConfig {
        write_mode: WriteMode::Direct,
        ..small_pages()
    };

    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 12);
    assert_eq!(dest.direct_writes(), 12);
    assert!(dest.flush_sizes().is_empty());
}

#[tokio::test]
async fn test_key_filter_limits_both_passes() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set("user:1", "a");
    source.set("user:2", "b");
    source.set("order:1", "c");
    dest.set("user:1", "a");
    dest.set("order:9", "z");

    let options = SyncConfig {
        key_filter: "user:*".into(),
        ..Default::default()
    };
    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.indexed_keys, 1);
    assert_eq!(report.counters.migrated, 1);
    assert_eq!(report.counters.skipped, 1);
    assert!(dest.get(b"order:1").is_none());
}

// ============================================================================
// Batching and failures
// ============================================================================

#[tokio::test]
async fn test_batches_never_exceed_threshold() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    for i in 0..50 {
        source.set(format!("k{i:02}"), "v");
    }
    let options = SyncConfig {
        batch_threshold: 7,
        page_size: 9,
        ..Default::default()
    };

    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    let sizes = dest.flush_sizes();
    assert!(sizes.iter().all(|&n| n > 0 && n <= 7), "{sizes:?}");
    assert_eq!(sizes.iter().sum::<usize>(), 50);
    assert_eq!(report.counters.migrated, 50);
}

#[tokio::test]
async fn test_rejected_writes_are_reported() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set("ok", "1");
    source.set("bad:1", "2");
    source.set("bad:2", "3");
    dest.reject_restore("bad:1");
    dest.reject_restore("bad:2");
    let options = SyncConfig {
        failure_list_limit: 1,
        ..Default::default()
    };

    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 1);
    assert_eq!(report.counters.failed, 2);
    assert_eq!(report.failures.keys.len(), 1);
    assert!(report.failures.truncated);
    assert!(!report.is_complete());
    assert_eq!(report.to_string(), "Migrated 1 keys, Skipped 0, Failed 2");
}

// ============================================================================
// Clusters
// ============================================================================

#[tokio::test]
async fn test_cluster_to_cluster_routes_by_slot() {
    let (sources, source_topology) = cluster("src", 3);
    let (dests, dest_topology) = cluster("dst", 2);
    for i in 0..100 {
        let key = format!("key:{i}");
        owner(&source_topology, &sources, &key).set(key.clone(), format!("v{i}"));
    }

    let report = engine(source_topology.clone(), dest_topology.clone(), small_pages())
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 100);
    assert_eq!(report.source_shards.len(), 3);
    assert!(report.is_complete());
    assert_eq!(dests.iter().map(|d| d.len()).sum::<usize>(), 100);
    for i in 0..100 {
        let key = format!("key:{i}");
        assert_eq!(
            owner(&dest_topology, &dests, &key).get(key.as_bytes()),
            value(&format!("v{i}"))
        );
    }

    let again = engine(source_topology, dest_topology, small_pages())
        .run()
        .await
        .unwrap();
    assert_eq!(again.counters.migrated, 0);
    assert_eq!(again.counters.skipped, 100);
}

#[tokio::test]
async fn test_single_to_cluster_and_back() {
    let (source, source_topology) = single("src");
    let (dests, dest_topology) = cluster("dst", 3);
    for i in 0..30 {
        source.set(format!("{{tag}}:{i}"), "t");
        source.set(format!("free:{i}"), "f");
    }

    let report = engine(source_topology, dest_topology.clone(), small_pages())
        .run()
        .await
        .unwrap();
    assert_eq!(report.counters.migrated, 60);

    // Hash-tagged keys share a slot, so one shard holds all of them.
    let tagged_owner = owner(&dest_topology, &dests, "{tag}:0");
    assert!((0..30).all(|i| tagged_owner.get(format!("{{tag}}:{i}").as_bytes()).is_some()));

    let (back, back_topology) = single("back");
    let report = engine(dest_topology, back_topology, small_pages())
        .run()
        .await
        .unwrap();
    assert_eq!(report.counters.migrated, 60);
    assert_eq!(back.len(), 60);
}

#[tokio::test]
async fn test_failing_shard_does_not_stop_the_run() {
    let (sources, source_topology) = cluster("src", 2);
    let (dests, dest_topology) = cluster("dst", 2);
    for i in 0..60 {
        let key = format!("key:{i}");
        owner(&source_topology, &sources, &key).set(key.clone(), "v");
    }
    let healthy_keys = sources[1].len() as u64;
    sources[0].fail_scan_after(1);

    let report = engine(source_topology, dest_topology, small_pages())
        .run()
        .await
        .unwrap();

    match &report.source_shards[0].outcome {
        ShardOutcome::PartialAtCursor { pages, keys, cursor, .. } => {
            assert_eq!(*pages, 1);
            assert_eq!(*keys, 5);
            assert!(!cursor.is_terminal());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(report.source_shards[1].outcome.is_complete());
    assert_eq!(report.counters.migrated, healthy_keys + 5);
    assert_eq!(
        dests.iter().map(|d| d.len() as u64).sum::<u64>(),
        healthy_keys + 5
    );
    assert_eq!(report.incomplete_shards().count(), 1);
}

#[tokio::test]
async fn test_failing_destination_shard_only_costs_extra_copies() {
    let (source, source_topology) = single("src");
    let (dest, dest_topology) = single("dst");
    source.set("a", "1");
    dest.set("a", "1");
    dest.fail_scan_after(0);

    let report = engine(source_topology, dest_topology, SyncConfig::default())
        .run()
        .await
        .unwrap();

    assert!(matches!(
        report.destination_shards[0].outcome,
        ShardOutcome::Failed { .. }
    ));
    assert_eq!(report.indexed_keys, 0);
    assert_eq!(report.counters.migrated, 1);
    assert_eq!(report.counters.skipped, 0);
}

// ============================================================================
// Key files
// ============================================================================

#[tokio::test]
async fn test_key_file_reads_each_key_from_its_owner() {
    let (sources, source_topology) = cluster("src", 3);
    let (dest, dest_topology) = single("dst");
    let listed: Vec<String> = (0..10).map(|i| format!("listed:{i}")).collect();
    for key in &listed {
        owner(&source_topology, &sources, key).set(key.clone(), format!("v-{key}"));
    }
    dest.set("listed:0", "v-listed:0");

    // Present only on a shard that does not own its slot.
    let stray = "stray";
    let stray_owner = source_topology.route(stray.as_bytes()).unwrap();
    sources[(stray_owner + 1) % sources.len()].set(stray, "x");

    let mut names: Vec<&str> = listed.iter().map(String::as_str).collect();
    names.push(stray);
    let file = key_file(&names);
    let options = SyncConfig {
        key_file: Some(file.path().to_path_buf()),
        batch_threshold: 4,
        ..Default::default()
    };

    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.skipped, 1);
    assert_eq!(report.counters.migrated, 9);
    assert_eq!(report.counters.failed, 0);
    // One batch for the whole file: flushed at the threshold and at the end.
    assert_eq!(dest.flush_sizes(), vec![4, 4, 1]);
    for key in &listed {
        assert_eq!(dest.get(key.as_bytes()), value(&format!("v-{key}")));
    }
    assert!(dest.get(stray.as_bytes()).is_none());
    assert!(report.source_shards.is_empty());
}

#[tokio::test]
async fn test_key_file_key_in_unowned_slot_fails() {
    // Only the lower half of the slot space is assigned.
    let source = Arc::new(MemoryShard::new("src:0"));
    let source_topology = Topology::cluster(vec![(
        source.clone() as Arc<dyn ShardStore>,
        vec![SlotRange::new(0, 8191)],
    )])
    .unwrap();
    let (dest, dest_topology) = single("dst");
    // bar hashes to slot 5061, foo to slot 12182
    source.set("bar", "1");
    source.set("foo", "2");

    let file = key_file(&["bar", "foo"]);
    let options = SyncConfig {
        key_file: Some(file.path().to_path_buf()),
        ..Default::default()
    };

    let report = engine(source_topology, dest_topology, options)
        .run()
        .await
        .unwrap();

    assert_eq!(report.counters.migrated, 1);
    assert_eq!(report.counters.failed, 1);
    assert_eq!(report.failures.keys, vec!["foo"]);
    assert_eq!(dest.get(b"bar"), value("1"));
    assert!(dest.get(b"foo").is_none());
}
