//! Legacy format tests.
//!
//! Tests for V1/V2 reading, V2 writing and version sniffing.

use std::fs;

use bytes::Bytes;
use tempfile::TempDir;
use topic_backup_core::legacy::{read_legacy, LegacyRecord, V2Writer};
use topic_backup_core::{sniff_version, BackupVersion, Error};

use super::helpers::{scenario_records, write_v3_backup};

#[test]
fn test_sniff_each_version() {
    let dir = TempDir::new().unwrap();

    let v1 = dir.path().join("v1.log");
    fs::write(&v1, "[]").unwrap();

    let v2 = dir.path().join("v2.log");
    let writer = V2Writer::create(&v2).unwrap();
    writer.finalize().unwrap();

    let v3 = write_v3_backup(dir.path(), "t", 1, &[(0, scenario_records())], 0);

    assert_eq!(sniff_version(&v1).unwrap(), BackupVersion::V1);
    assert_eq!(sniff_version(&v2).unwrap(), BackupVersion::V2);
    assert_eq!(sniff_version(&v3).unwrap(), BackupVersion::V3);
}

#[test]
fn test_sniff_rejects_unknown_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("unknown");

    for content in ["", "   \n", "/V4\nabc", "{\"not\": \"a list\"}"] {
        fs::write(&path, content).unwrap();
        assert!(
            matches!(sniff_version(&path), Err(Error::Format(_))),
            "{:?} was accepted",
            content
        );
    }
}

#[test]
fn test_v2_writer_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.log");

    let mut writer = V2Writer::create(&path).unwrap();
    writer.append(Some(&b"k1"[..]), Some(&b"v1"[..])).unwrap();
    writer.append(None, Some(&b"\x00\xff binary"[..])).unwrap();
    writer.append(Some(&b""[..]), None).unwrap();
    assert_eq!(writer.finalize().unwrap(), 3);

    let (version, records) = read_legacy(&path).unwrap();
    assert_eq!(version, BackupVersion::V2);
    assert_eq!(
        records,
        vec![
            LegacyRecord::new(Some(Bytes::from("k1")), Some(Bytes::from("v1"))),
            LegacyRecord::new(None, Some(Bytes::from_static(b"\x00\xff binary"))),
            LegacyRecord::new(Some(Bytes::new()), None),
        ]
    );

    // Only the finished file remains
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_v2_writer_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("backup.log");
    fs::write(&path, "occupied").unwrap();

    assert!(matches!(V2Writer::create(&path), Err(Error::BackupExists(_))));
    assert_eq!(fs::read_to_string(&path).unwrap(), "occupied");
}

#[test]
fn test_read_v1_value_shapes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v1.log");
    fs::write(
        &path,
        r#"[
            ["{\"subject\": \"s\"}", "{\"schema\": 1}"],
            [{"keytype": "SCHEMA", "magic": 1}, null],
            [null, 42]
        ]"#,
    )
    .unwrap();

    let (version, records) = read_legacy(&path).unwrap();
    assert_eq!(version, BackupVersion::V1);
    assert_eq!(
        records,
        vec![
            LegacyRecord::new(
                Some(Bytes::from(r#"{"subject": "s"}"#)),
                Some(Bytes::from(r#"{"schema": 1}"#))
            ),
            LegacyRecord::new(Some(Bytes::from(r#"{"keytype":"SCHEMA","magic":1}"#)), None),
            LegacyRecord::new(None, Some(Bytes::from("42"))),
        ]
    );
}

#[test]
fn test_read_legacy_rejects_v3() {
    let dir = TempDir::new().unwrap();
    let v3 = write_v3_backup(dir.path(), "t", 1, &[(0, scenario_records())], 0);
    assert!(matches!(read_legacy(&v3), Err(Error::Format(_))));
}

#[test]
fn test_malformed_v2_line() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v2.log");
    fs::write(&path, "/V2\nno-tab-here\n").unwrap();
    assert!(matches!(read_legacy(&path), Err(Error::Format(_))));
}
