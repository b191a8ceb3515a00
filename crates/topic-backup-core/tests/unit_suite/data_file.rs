//! Data file writer/reader tests.
//!
//! Tests for the V3 data file including:
//! - Round trips through the writer and reader
//! - Checksum determinism
//! - Checkpoint cadence and truncation handling

use std::fs;

use tempfile::TempDir;
use topic_backup_core::checksum::{ChecksumAlgorithm, Xxh3_64Be};
use topic_backup_core::datafile::{
    DataFileEntry, DataFileReader, DataFileWriter, DataFileWriterConfig,
};
use topic_backup_core::Error;

use super::helpers::{generate_test_records, scenario_records, unusual_record};

fn writer(dir: &TempDir, name: &str, partition: i32, interval: u32) -> DataFileWriter {
    DataFileWriter::create(
        dir.path(),
        name,
        partition,
        &Xxh3_64Be,
        DataFileWriterConfig {
            checkpoint_interval: interval,
        },
    )
    .unwrap()
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_round_trip_preserves_records() {
    let dir = TempDir::new().unwrap();
    let mut records = scenario_records();
    records.push(unusual_record(0, 2));

    let mut w = writer(&dir, "t:0.data", 0, 2);
    for record in &records {
        w.append(record).unwrap();
    }
    let descriptor = w.finalize().unwrap();

    assert_eq!(descriptor.record_count, 3);
    assert_eq!(descriptor.start_offset, Some(0));
    assert_eq!(descriptor.end_offset, Some(2));

    let mut reader = DataFileReader::open(&dir.path().join("t:0.data"), &Xxh3_64Be).unwrap();
    let read = reader.read_all().unwrap();
    assert_eq!(read, records);
    assert!(reader.is_finished());
    assert_eq!(reader.digest(), descriptor.checksum);
}

#[test]
fn test_descriptor_checksum_covers_whole_file() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:3.data", 3, 10);
    for record in generate_test_records(3, 100, 25) {
        w.append(&record).unwrap();
    }
    let descriptor = w.finalize().unwrap();

    let bytes = fs::read(dir.path().join("t:3.data")).unwrap();
    assert_eq!(descriptor.checksum, Xxh3_64Be.compute(&bytes));
    assert_eq!(descriptor.checksum_hex(), hex::encode(&descriptor.checksum));
    assert_eq!(descriptor.checksum_hex().len(), 16);
}

#[test]
fn test_same_records_give_same_checksum() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    let checksums: Vec<String> = [&first, &second]
        .iter()
        .map(|dir| {
            let mut w = writer(dir, "t:0.data", 0, 4);
            for record in generate_test_records(0, 0, 10) {
                w.append(&record).unwrap();
            }
            w.finalize().unwrap().checksum_hex()
        })
        .collect();

    assert_eq!(checksums[0], checksums[1]);
}

#[test]
fn test_empty_file_is_valid() {
    let dir = TempDir::new().unwrap();
    let descriptor = writer(&dir, "t:1.data", 1, 0).finalize().unwrap();

    assert_eq!(descriptor.record_count, 0);
    assert_eq!(descriptor.start_offset, None);
    assert_eq!(descriptor.end_offset, None);

    let mut reader = DataFileReader::open(&dir.path().join("t:1.data"), &Xxh3_64Be).unwrap();
    assert!(reader.read_all().unwrap().is_empty());
    assert_eq!(reader.digest(), descriptor.checksum);
}

// ============================================================================
// Checkpoints
// ============================================================================

#[test]
fn test_checkpoint_cadence() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:0.data", 0, 3);
    for record in generate_test_records(0, 0, 10) {
        w.append(&record).unwrap();
    }
    assert_eq!(w.checkpoint_count(), 3);
    w.finalize().unwrap();

    let mut reader = DataFileReader::open(&dir.path().join("t:0.data"), &Xxh3_64Be).unwrap();
    let mut indices = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        if let DataFileEntry::Checkpoint(observation) = entry {
            assert!(observation.matches());
            indices.push(observation.record_index);
        }
    }
    assert_eq!(indices, vec![3, 6, 9]);
    assert_eq!(reader.checkpoints_read(), 3);
}

#[test]
fn test_zero_interval_writes_no_checkpoints() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:0.data", 0, 0);
    for record in generate_test_records(0, 0, 50) {
        w.append(&record).unwrap();
    }
    assert_eq!(w.checkpoint_count(), 0);
    w.finalize().unwrap();

    let mut reader = DataFileReader::open(&dir.path().join("t:0.data"), &Xxh3_64Be).unwrap();
    assert_eq!(reader.read_all().unwrap().len(), 50);
    assert_eq!(reader.checkpoints_read(), 0);
}

// ============================================================================
// Writer contract
// ============================================================================

#[test]
fn test_writer_rejects_foreign_partition_and_offset_regression() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:0.data", 0, 0);

    let foreign = generate_test_records(1, 0, 1);
    assert!(matches!(w.append(&foreign[0]), Err(Error::InvalidRecord(_))));

    let records = generate_test_records(0, 5, 2);
    w.append(&records[1]).unwrap();
    assert!(matches!(w.append(&records[0]), Err(Error::InvalidRecord(_))));

    // Equal offsets are allowed
    w.append(&records[1]).unwrap();
    assert_eq!(w.record_count(), 2);
}

#[test]
fn test_dropped_writer_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    {
        let mut w = writer(&dir, "t:0.data", 0, 0);
        for record in generate_test_records(0, 0, 3) {
            w.append(&record).unwrap();
        }
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_writer_refuses_existing_destination() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("t:0.data"), b"occupied").unwrap();

    let result = DataFileWriter::create(
        dir.path(),
        "t:0.data",
        0,
        &Xxh3_64Be,
        DataFileWriterConfig::default(),
    );
    assert!(matches!(result, Err(Error::BackupExists(_))));
}

// ============================================================================
// Damaged files
// ============================================================================

#[test]
fn test_truncated_file() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:0.data", 0, 0);
    for record in generate_test_records(0, 0, 4) {
        w.append(&record).unwrap();
    }
    w.finalize().unwrap();

    let path = dir.path().join("t:0.data");
    let data = fs::read(&path).unwrap();

    // Cut inside the last record frame, before the END frame
    fs::write(&path, &data[..data.len() - 20]).unwrap();

    let mut reader = DataFileReader::open(&path, &Xxh3_64Be).unwrap();
    let mut read = 0;
    let err = loop {
        match reader.next() {
            Some(Ok(_)) => read += 1,
            Some(Err(e)) => break e,
            None => panic!("truncated file read to completion"),
        }
    };
    assert_eq!(read, 3);
    assert!(matches!(err, Error::TruncatedRecord { record_index: 3, .. }));
    assert!(reader.next().is_none());
}

#[test]
fn test_missing_end_frame_is_truncation() {
    let dir = TempDir::new().unwrap();
    let mut w = writer(&dir, "t:0.data", 0, 0);
    for record in generate_test_records(0, 0, 2) {
        w.append(&record).unwrap();
    }
    w.finalize().unwrap();

    let path = dir.path().join("t:0.data");
    let data = fs::read(&path).unwrap();
    // END frame: 5 byte frame header + 8 byte count
    fs::write(&path, &data[..data.len() - 13]).unwrap();

    let mut reader = DataFileReader::open(&path, &Xxh3_64Be).unwrap();
    assert!(matches!(
        reader.read_all(),
        Err(Error::TruncatedRecord { record_index: 2, .. })
    ));
}

#[test]
fn test_open_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.data");

    fs::write(&path, b"KB").unwrap();
    assert!(matches!(
        DataFileReader::open(&path, &Xxh3_64Be),
        Err(Error::Format(_))
    ));

    fs::write(&path, b"NOT A DATA FILE AT ALL").unwrap();
    assert!(matches!(
        DataFileReader::open(&path, &Xxh3_64Be),
        Err(Error::Format(_))
    ));
}

#[test]
fn test_trailing_bytes_after_end() {
    let dir = TempDir::new().unwrap();
    writer(&dir, "t:0.data", 0, 0).finalize().unwrap();

    let path = dir.path().join("t:0.data");
    let mut data = fs::read(&path).unwrap();
    data.push(0);
    fs::write(&path, data).unwrap();

    let mut reader = DataFileReader::open(&path, &Xxh3_64Be).unwrap();
    assert!(matches!(reader.read_all(), Err(Error::Format(_))));
}
