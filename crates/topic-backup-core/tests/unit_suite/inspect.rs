//! Inspect tests.
//!
//! Tests for the JSON description of backups, legacy versions included.

use std::fs;

use tempfile::TempDir;
use topic_backup_core::inspect::UNKNOWN_ALGORITHM_WARNING;
use topic_backup_core::metadata::{write_metadata_file, BackupMetadata, DataFileDescriptor};
use topic_backup_core::{inspect, InspectOutput};

use super::helpers::{fixed_time, registry};

fn fixture(checksum_algorithm: &str) -> BackupMetadata {
    BackupMetadata {
        tool_name: "topic-backup".to_string(),
        tool_version: "0.3.0".to_string(),
        started_at: fixed_time(1_683_901_485_932),
        finished_at: fixed_time(1_683_901_486_034),
        topic_name: "6595c9c2".to_string(),
        topic_id: Some("x8dAkx5QRmOVNBeS9Hzbyw".to_string()),
        partition_count: 2,
        checksum_algorithm: checksum_algorithm.to_string(),
        data_files: vec![DataFileDescriptor {
            filename: "6595c9c2:0.data".to_string(),
            partition: 0,
            checksum: vec![0xf0, 0x0d, 0xfa, 0xce, 0xca, 0xfe, 0xbe, 0xef],
            record_count: 2,
            start_offset: Some(0),
            end_offset: Some(1),
        }],
    }
}

#[test]
fn test_inspect_v3_exact_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("6595c9c2.metadata");
    write_metadata_file(&path, &fixture("xxhash3_64_be")).unwrap();

    let inspection = inspect(&path, &registry()).unwrap();
    assert!(inspection.warnings.is_empty());
    assert_eq!(
        inspection.to_json().unwrap(),
        r#"{
  "version": 3,
  "tool_name": "topic-backup",
  "tool_version": "0.3.0",
  "started_at": "2023-05-12T14:24:45.932000+00:00",
  "finished_at": "2023-05-12T14:24:46.034000+00:00",
  "topic_name": "6595c9c2",
  "topic_id": "x8dAkx5QRmOVNBeS9Hzbyw",
  "partition_count": 2,
  "checksum_algorithm": "xxhash3_64_be",
  "data_files": [
    {
      "filename": "6595c9c2:0.data",
      "partition": 0,
      "checksum_hex": "f00dfacecafebeef",
      "record_count": 2,
      "start_offset": 0,
      "end_offset": 1
    }
  ]
}"#
    );
}

#[test]
fn test_inspect_through_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("6595c9c2.metadata");
    write_metadata_file(&path, &fixture("xxhash3_64_be")).unwrap();

    let inspection = inspect(dir.path(), &registry()).unwrap();
    match inspection.output {
        InspectOutput::V3(view) => assert_eq!(view.data_files.len(), 1),
        other => panic!("unexpected output {:?}", other),
    }
}

#[test]
fn test_inspect_unknown_algorithm() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("6595c9c2.metadata");
    write_metadata_file(&path, &fixture("sha7_1000")).unwrap();

    let inspection = inspect(&path, &registry()).unwrap();
    assert_eq!(inspection.warnings, vec![UNKNOWN_ALGORITHM_WARNING.to_string()]);

    let json: serde_json::Value = serde_json::from_str(&inspection.to_json().unwrap()).unwrap();
    assert_eq!(json["checksum_algorithm"], "unknown");
    assert_eq!(json["data_files"][0]["checksum_hex"], "f00dfacecafebeef");
}

#[test]
fn test_inspect_legacy_versions() {
    let dir = TempDir::new().unwrap();
    let v1 = dir.path().join("v1.log");
    fs::write(&v1, "\n  [[\"k\", \"v\"], [null, {\"a\": 1}]]").unwrap();
    let v2 = dir.path().join("v2.log");
    fs::write(&v2, "/V2\n-\t-\n").unwrap();

    for (path, version) in [(v1, 1), (v2, 2)] {
        let inspection = inspect(&path, &registry()).unwrap();
        assert!(inspection.warnings.is_empty());
        let json: serde_json::Value =
            serde_json::from_str(&inspection.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "version": version }));
    }
}

#[test]
fn test_inspect_rejects_corrupt_metadata() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.metadata");
    write_metadata_file(&path, &fixture("xxhash3_64_be")).unwrap();

    let mut data = fs::read(&path).unwrap();
    let middle = data.len() / 2;
    data[middle] ^= 0xff;
    fs::write(&path, data).unwrap();

    assert!(matches!(
        inspect(&path, &registry()),
        Err(topic_backup_core::Error::Format(_))
    ));
}
