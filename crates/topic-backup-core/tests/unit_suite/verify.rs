//! Verifier tests.
//!
//! Tests for file- and record-level verification including:
//! - Intact backups
//! - Bit flips with and without checkpoints
//! - Legacy inputs and unknown checksum algorithms

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use topic_backup_core::layout::data_file_name;
use topic_backup_core::metadata::{write_metadata_file, BackupMetadata, DataFileDescriptor};
use topic_backup_core::verify::FULL_FILE_MISMATCH;
use topic_backup_core::{Error, FileVerdict, Verifier, VerifyLevel};

use super::helpers::{
    find_bytes, fixed_time, flip_bit, generate_test_records, registry, scenario_records,
    write_v3_backup,
};

fn data_path(metadata_path: &Path, topic: &str, partition: i32) -> PathBuf {
    metadata_path
        .parent()
        .unwrap()
        .join(data_file_name(topic, partition))
}

fn verdicts(location: &Path, level: VerifyLevel) -> Vec<FileVerdict> {
    let registry = registry();
    Verifier::new(&registry)
        .verify_location(location, level)
        .unwrap()
        .files
        .into_iter()
        .map(|f| f.verdict)
        .collect()
}

// ============================================================================
// Intact backups
// ============================================================================

#[test]
fn test_untouched_backup_is_intact_at_both_levels() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dir.path(),
        "orders",
        3,
        &[
            (0, scenario_records()),
            (2, generate_test_records(2, 10, 30)),
        ],
        7,
    );

    for level in [VerifyLevel::File, VerifyLevel::Record] {
        let registry = registry();
        let report = Verifier::new(&registry)
            .verify_location(&metadata_path, level)
            .unwrap();
        assert!(report.is_success(true));
        assert_eq!(report.intact_count(), 2);
        assert_eq!(
            report.render(false),
            "Integrity of orders:0.data is intact.\n\
             Integrity of orders:2.data is intact.\n\
             ✅ Verified 2 data files in backup OK.\n"
        );
    }
}

#[test]
fn test_directory_location_is_accepted() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(dir.path(), "t", 1, &[(0, scenario_records())], 0);

    let verdicts = verdicts(metadata_path.parent().unwrap(), VerifyLevel::File);
    assert_eq!(verdicts, vec![FileVerdict::Intact]);
}

// ============================================================================
// Corruption
// ============================================================================

#[test]
fn test_bit_flip_without_checkpoints() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(dir.path(), "a-topic", 1, &[(0, scenario_records())], 0);
    let data = data_path(&metadata_path, "a-topic", 0);
    flip_bit(&data, find_bytes(&data, b"some header value"));

    assert_eq!(
        verdicts(&metadata_path, VerifyLevel::File),
        vec![FileVerdict::NotIntact { reason: None }]
    );
    assert_eq!(
        verdicts(&metadata_path, VerifyLevel::Record),
        vec![FileVerdict::NotIntact {
            reason: Some(format!("InvalidChecksum: {}", FULL_FILE_MISMATCH)),
        }]
    );

    let registry = registry();
    let report = Verifier::new(&registry)
        .verify_location(&metadata_path, VerifyLevel::Record)
        .unwrap();
    assert!(!report.is_success(false));
    assert_eq!(
        report.render(false),
        "Integrity of a-topic:0.data is not intact!\n    \
         InvalidChecksum: Found checksum mismatch after reading full data file.\n\
         💥 Failed to verify integrity of some data files.\n"
    );
}

#[test]
fn test_checkpoints_localize_the_damage() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dir.path(),
        "t",
        1,
        &[(0, generate_test_records(0, 0, 10))],
        4,
    );
    let data = data_path(&metadata_path, "t", 0);
    flip_bit(&data, find_bytes(&data, b"value-5"));

    assert_eq!(
        verdicts(&metadata_path, VerifyLevel::File),
        vec![FileVerdict::NotIntact { reason: None }]
    );
    assert_eq!(
        verdicts(&metadata_path, VerifyLevel::Record),
        vec![FileVerdict::NotIntact {
            reason: Some(
                "InvalidChecksum: Found checksum mismatch between record 4 and record 8."
                    .to_string()
            ),
        }]
    );
}

#[test]
fn test_damage_after_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dir.path(),
        "t",
        1,
        &[(0, generate_test_records(0, 0, 10))],
        4,
    );
    let data = data_path(&metadata_path, "t", 0);
    flip_bit(&data, find_bytes(&data, b"value-9"));

    assert_eq!(
        verdicts(&metadata_path, VerifyLevel::Record),
        vec![FileVerdict::NotIntact {
            reason: Some(format!("InvalidChecksum: {}", FULL_FILE_MISMATCH)),
        }]
    );
}

#[test]
fn test_failures_do_not_stop_other_files() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dir.path(),
        "t",
        2,
        &[
            (0, generate_test_records(0, 0, 3)),
            (1, generate_test_records(1, 0, 3)),
        ],
        0,
    );
    fs::remove_file(data_path(&metadata_path, "t", 0)).unwrap();

    for level in [VerifyLevel::File, VerifyLevel::Record] {
        let verdicts = verdicts(&metadata_path, level);
        assert!(matches!(verdicts[0], FileVerdict::NotIntact { reason: Some(_) }));
        assert_eq!(verdicts[1], FileVerdict::Intact);
    }
}

#[test]
fn test_truncated_data_file() {
    let dir = TempDir::new().unwrap();
    let metadata_path = write_v3_backup(
        dir.path(),
        "t",
        1,
        &[(0, generate_test_records(0, 0, 3))],
        0,
    );
    let data = data_path(&metadata_path, "t", 0);
    let bytes = fs::read(&data).unwrap();
    fs::write(&data, &bytes[..bytes.len() - 1]).unwrap();

    let verdicts = verdicts(&metadata_path, VerifyLevel::Record);
    match &verdicts[0] {
        FileVerdict::NotIntact { reason: Some(reason) } => {
            assert!(reason.starts_with("TruncatedRecord:"), "{}", reason)
        }
        other => panic!("unexpected verdict {:?}", other),
    }
}

// ============================================================================
// Unsupported inputs
// ============================================================================

#[test]
fn test_legacy_backups_cannot_be_verified() {
    let dir = TempDir::new().unwrap();
    let v1 = dir.path().join("v1.log");
    fs::write(&v1, r#"[["key", "value"]]"#).unwrap();
    let v2 = dir.path().join("v2.log");
    fs::write(&v2, "/V2\na2V5\tdmFsdWU=\n").unwrap();

    let registry = registry();
    let verifier = Verifier::new(&registry);
    for (path, expected) in [
        (&v1, "Only backups using format V3 can be verified, found V1."),
        (&v2, "Only backups using format V3 can be verified, found V2."),
    ] {
        for level in [VerifyLevel::File, VerifyLevel::Record] {
            let err = verifier.verify_location(path, level).unwrap_err();
            assert!(matches!(err, Error::UnsupportedLegacyOperation { .. }));
            assert_eq!(err.to_string(), expected);
        }
    }
}

#[test]
fn test_unknown_algorithm_cannot_be_verified() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.metadata");
    let metadata = BackupMetadata {
        tool_name: "topic-backup".to_string(),
        tool_version: "9.0.0".to_string(),
        started_at: fixed_time(1_683_901_485_932),
        finished_at: fixed_time(1_683_901_485_999),
        topic_name: "t".to_string(),
        topic_id: None,
        partition_count: 1,
        checksum_algorithm: "blake9_512".to_string(),
        data_files: vec![DataFileDescriptor {
            filename: "t:0.data".to_string(),
            partition: 0,
            checksum: vec![0xab; 64],
            record_count: 1,
            start_offset: Some(0),
            end_offset: Some(0),
        }],
    };
    write_metadata_file(&path, &metadata).unwrap();

    let registry = registry();
    let report = Verifier::new(&registry)
        .verify_location(&path, VerifyLevel::File)
        .unwrap();

    assert_eq!(report.unverifiable_count(), 1);
    assert!(report.is_success(false));
    assert!(!report.is_success(true));
    assert_eq!(
        report.render(false),
        "Integrity of t:0.data cannot be verified, unknown checksum algorithm \"blake9_512\".\n\
         ⚠️ Could not verify 1 data files with an unknown checksum algorithm.\n\
         ✅ Verified 0 data files in backup OK.\n"
    );
}
