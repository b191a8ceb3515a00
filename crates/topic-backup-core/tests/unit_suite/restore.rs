//! Restore engine tests.
//!
//! Backups are produced either by the backup engine or by the on-disk
//! helpers, then restored into a fresh `MemoryCluster`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tempfile::TempDir;
use topic_backup_core::layout::{data_file_name, topic_directory};
use topic_backup_core::legacy::V2Writer;
use topic_backup_core::metadata::write_metadata_file;
use topic_backup_core::verify::FULL_FILE_MISMATCH;
use topic_backup_core::{
    read_metadata, BackupEngine, BackupOptions, BackupVersion, ChecksumRegistry, ClusterSink,
    Error, MemoryCluster, RestoreEngine, RestoreOptions,
};

use super::helpers::{
    find_bytes, flip_bit, generate_test_records, scenario_records, unusual_record,
    write_v3_backup,
};

fn restore_engine(cluster: &Arc<MemoryCluster>, options: RestoreOptions) -> RestoreEngine {
    RestoreEngine::new(
        cluster.clone(),
        Arc::new(ChecksumRegistry::with_defaults()),
        options,
    )
    .unwrap()
}

async fn backup_of(cluster: &Arc<MemoryCluster>, topic: &str, destination: &Path) -> PathBuf {
    BackupEngine::new(
        cluster.clone(),
        Arc::new(ChecksumRegistry::with_defaults()),
        BackupOptions::default(),
    )
    .backup(topic, destination)
    .await
    .unwrap()
    .location
}

// ============================================================================
// Format V3
// ============================================================================

#[tokio::test]
async fn test_backup_then_restore_into_empty_topic() {
    let source = Arc::new(MemoryCluster::new());
    source.create_topic("t", 1, None).unwrap();
    source.append("t", 0, &scenario_records()).unwrap();

    let dest = TempDir::new().unwrap();
    let location = backup_of(&source, "t", dest.path()).await;

    let target = Arc::new(MemoryCluster::new());
    let report = restore_engine(&target, RestoreOptions::default())
        .restore(&location, "t")
        .await
        .unwrap();
    assert_eq!(report.version, BackupVersion::V3);
    assert_eq!(report.total_records(), 2);

    let restored = target.records("t", 0).unwrap();
    let originals = scenario_records();
    assert_eq!(restored.len(), 2);
    for (i, (restored, original)) in restored.iter().zip(&originals).enumerate() {
        assert_eq!(restored.offset, i as i64);
        assert!(
            restored.same_payload(original),
            "{:?} != {:?}",
            restored,
            original
        );
    }
}

#[tokio::test]
async fn test_restore_keeps_partition_assignment() {
    let source = Arc::new(MemoryCluster::new());
    source.create_topic("t", 3, None).unwrap();
    source.append("t", 0, &generate_test_records(0, 0, 4)).unwrap();
    source.append("t", 2, &generate_test_records(2, 0, 9)).unwrap();

    let dest = TempDir::new().unwrap();
    backup_of(&source, "t", dest.path()).await;

    let target = Arc::new(MemoryCluster::new());
    let options = RestoreOptions {
        produce_batch_size: 2,
        max_concurrent_partitions: 2,
    };
    // A directory location resolves to its metadata file
    let report = restore_engine(&target, options)
        .restore(&topic_directory(dest.path(), "t"), "copy")
        .await
        .unwrap();

    assert_eq!(report.target_topic, "copy");
    assert_eq!(report.total_records(), 13);
    assert_eq!(target.partition_count("copy").await.unwrap(), 3);
    for partition in 0..3 {
        let expected = source.records("t", partition).unwrap();
        let restored = target.records("copy", partition).unwrap();
        assert_eq!(restored.len(), expected.len());
        assert!(restored
            .iter()
            .zip(&expected)
            .all(|(a, b)| a.same_payload(b)));
    }
}

#[tokio::test]
async fn test_unusual_records_survive() {
    let dest = TempDir::new().unwrap();
    let records = vec![unusual_record(0, 10), unusual_record(0, 11)];
    let metadata_path = write_v3_backup(dest.path(), "odd", 1, &[(0, records.clone())], 1);

    let target = Arc::new(MemoryCluster::new());
    restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "odd")
        .await
        .unwrap();

    let restored = target.records("odd", 0).unwrap();
    assert_eq!(restored.len(), 2);
    assert!(restored[0].same_payload(&records[0]));
    assert!(restored[1].same_payload(&records[1]));
    assert_eq!(restored[0].offset, 0);
}

#[tokio::test]
async fn test_unknown_algorithm() {
    let dest = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(dest.path(), "t", 1, &[(0, scenario_records())], 0);

    let mut metadata = read_metadata(&metadata_path).unwrap();
    metadata.checksum_algorithm = "sha1".to_string();
    fs::remove_file(&metadata_path).unwrap();
    write_metadata_file(&metadata_path, &metadata).unwrap();

    let target = Arc::new(MemoryCluster::new());
    let result = restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "t")
        .await;

    assert!(matches!(result, Err(Error::UnsupportedAlgorithm(id)) if id == "sha1"));
    assert!(!target.has_topic("t"));
}

#[tokio::test]
async fn test_corrupted_data_file() {
    let dest = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dest.path(),
        "t",
        1,
        &[(0, generate_test_records(0, 0, 10))],
        0,
    );
    let data_path = topic_directory(dest.path(), "t").join(data_file_name("t", 0));
    flip_bit(&data_path, find_bytes(&data_path, b"value-3"));

    let target = Arc::new(MemoryCluster::new());
    let result = restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "t")
        .await;

    match result {
        Err(Error::InvalidChecksum(message)) => assert!(message.contains(FULL_FILE_MISMATCH)),
        other => panic!("expected InvalidChecksum, got {:?}", other.map(|r| r.version)),
    }
}

#[tokio::test]
async fn test_data_file_for_another_partition() {
    let dest = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dest.path(),
        "t",
        2,
        &[(1, generate_test_records(1, 0, 3))],
        0,
    );

    // Point partition 0 at the file written for partition 1
    let mut metadata = read_metadata(&metadata_path).unwrap();
    metadata.data_files[0].partition = 0;
    fs::remove_file(&metadata_path).unwrap();
    write_metadata_file(&metadata_path, &metadata).unwrap();

    let target = Arc::new(MemoryCluster::new());
    let result = restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "t")
        .await;

    assert!(matches!(result, Err(Error::Format(_))));
    assert!(target.records("t", 0).unwrap().is_empty());
    assert!(target.records("t", 1).unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_data_file_is_skipped() {
    let dest = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(dest.path(), "t", 2, &[(0, Vec::new())], 0);

    let target = Arc::new(MemoryCluster::new());
    let report = restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "t")
        .await
        .unwrap();

    assert!(report.partitions.is_empty());
    assert_eq!(target.partition_count("t").await.unwrap(), 2);
    assert!(target.records("t", 0).unwrap().is_empty());
}

#[tokio::test]
async fn test_target_with_too_few_partitions() {
    let dest = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dest.path(),
        "t",
        3,
        &[(2, generate_test_records(2, 0, 3))],
        0,
    );

    let target = Arc::new(MemoryCluster::new());
    target.create_topic("t", 2, None).unwrap();
    let result = restore_engine(&target, RestoreOptions::default())
        .restore(&metadata_path, "t")
        .await;

    assert!(matches!(
        result,
        Err(Error::PartitionCount {
            expected: 3,
            found: 2,
            ..
        })
    ));
}

#[test]
fn test_invalid_options() {
    let target = Arc::new(MemoryCluster::new());
    let result = RestoreEngine::new(
        target,
        Arc::new(ChecksumRegistry::with_defaults()),
        RestoreOptions {
            produce_batch_size: 0,
            max_concurrent_partitions: 1,
        },
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

// ============================================================================
// Legacy formats
// ============================================================================

#[tokio::test]
async fn test_restore_v1_backup() {
    let dest = TempDir::new().unwrap();
    let path = dest.path().join("schemas.json");
    fs::write(
        &path,
        r#"[["{\"subject\":\"a\"}", "{\"schema\":\"x\"}"], ["k2", null]]"#,
    )
    .unwrap();

    let before = Utc::now().timestamp_millis();
    let target = Arc::new(MemoryCluster::new());
    let report = restore_engine(&target, RestoreOptions::default())
        .restore(&path, "_schemas")
        .await
        .unwrap();

    assert_eq!(report.version, BackupVersion::V1);
    assert_eq!(report.total_records(), 2);

    let restored = target.records("_schemas", 0).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].key, Some(Bytes::from(r#"{"subject":"a"}"#)));
    assert_eq!(restored[0].value, Some(Bytes::from(r#"{"schema":"x"}"#)));
    assert_eq!(restored[1].key, Some(Bytes::from("k2")));
    assert_eq!(restored[1].value, None);
    assert!(restored.iter().all(|r| r.timestamp >= before));
    assert!(restored.iter().all(|r| r.headers.is_empty()));
}

#[tokio::test]
async fn test_restore_v2_backup() {
    let dest = TempDir::new().unwrap();
    let path = dest.path().join("backup.log");
    let mut writer = V2Writer::create(&path).unwrap();
    for i in 0..7 {
        let key = format!("key-{}", i);
        writer.append(Some(key.as_bytes()), None).unwrap();
    }
    writer.finalize().unwrap();

    let target = Arc::new(MemoryCluster::new());
    let options = RestoreOptions {
        produce_batch_size: 3,
        ..RestoreOptions::default()
    };
    let report = restore_engine(&target, options)
        .restore(&path, "t")
        .await
        .unwrap();

    assert_eq!(report.version, BackupVersion::V2);
    let restored = target.records("t", 0).unwrap();
    assert_eq!(
        restored
            .iter()
            .map(|r| (r.offset, r.key.clone()))
            .collect::<Vec<_>>(),
        (0..7)
            .map(|i| (i as i64, Some(Bytes::from(format!("key-{}", i)))))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_legacy_restore_needs_single_partition_target() {
    let dest = TempDir::new().unwrap();
    let path = dest.path().join("backup.json");
    fs::write(&path, r#"[["a", "b"]]"#).unwrap();

    let target = Arc::new(MemoryCluster::new());
    target.create_topic("wide", 3, None).unwrap();
    let result = restore_engine(&target, RestoreOptions::default())
        .restore(&path, "wide")
        .await;

    assert!(matches!(
        result,
        Err(Error::PartitionCount {
            expected: 1,
            found: 3,
            ..
        })
    ));
    assert!(target.records("wide", 0).unwrap().is_empty());
}
