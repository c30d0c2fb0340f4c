//! Finder protocol conformance (spec §8.1–§8.2): `GetIndex` agreement across
//! all three implementations, the binary-search stress table, and collision
//! with a periodic checksum row boundary.

use std::path::Path;
use std::sync::Arc;

use frozendb::{
    make_nullrow_uuid, marshal, BinarySearchFinder, DataRow, EndControl, FileManager, Finder,
    FinderKind, Handle, InMemoryFinder, Kind, Mode, RowKind, SimpleFinder, StartControl,
    HEADER_SIZE,
};
use tempfile::tempdir;
use uuid::Uuid;

/// A UUIDv7-shaped, non-NullRow key carrying exactly `ts_ms` as its timestamp.
fn key_at(ts_ms: i64) -> Uuid {
    let mut bytes = *make_nullrow_uuid(ts_ms).as_bytes();
    bytes[15] = 1; // disambiguate from the all-zero NullRow shape
    Uuid::from_bytes(bytes)
}

/// Build a file with one single-row committed transaction per timestamp in
/// `timestamps`, in that file order.
///
/// Rows are appended directly through the `FileManager` rather than through
/// `Tx::add_row`, because several of the stress-table orderings below are
/// deliberately not monotonic against the skew-ordering invariant Tx enforces
/// at write time: they exist to probe the Finder's search logic against a
/// given on-disk row order, not to model a reachable write sequence.
fn build_db(dir: &Path, row_size: u32, skew_ms: i64, timestamps: &[i64]) -> std::path::PathBuf {
    let path = dir.join("a.fdb");
    Handle::create(&path, row_size, skew_ms).unwrap();
    let fm = FileManager::open(&path, Mode::Write, row_size).unwrap();
    for &ts in timestamps {
        let row = DataRow::new(
            key_at(ts),
            br#"{}"#.to_vec(),
            StartControl::Transaction,
            EndControl::Commit,
            row_size,
        )
        .unwrap();
        let bytes = marshal(&RowKind::Data(row), row_size).unwrap();
        fm.append(bytes).unwrap();
    }
    fm.close().unwrap();
    path
}

fn complete_row_count(fm: &FileManager) -> usize {
    let size = fm.size();
    if size <= HEADER_SIZE as u64 {
        return 0;
    }
    ((size - HEADER_SIZE as u64) / fm.row_size() as u64) as usize
}

fn open_all_finders(path: &Path, row_size: u32, skew_ms: i64) -> (SimpleFinder, BinarySearchFinder, InMemoryFinder) {
    let fm_simple = Arc::new(FileManager::open(path, Mode::Read, row_size).unwrap());
    let count = complete_row_count(&fm_simple);
    let simple = SimpleFinder::new(fm_simple, count).unwrap();

    let fm_binary = Arc::new(FileManager::open(path, Mode::Read, row_size).unwrap());
    let count = complete_row_count(&fm_binary);
    let binary = BinarySearchFinder::new(fm_binary, count, skew_ms).unwrap();

    let fm_inmemory = FileManager::open(path, Mode::Read, row_size).unwrap();
    let count = complete_row_count(&fm_inmemory);
    let inmemory = InMemoryFinder::new(&fm_inmemory, count).unwrap();
    fm_inmemory.close().unwrap();

    (simple, binary, inmemory)
}

fn assert_all_agree(finders: &(SimpleFinder, BinarySearchFinder, InMemoryFinder), key: &Uuid, expected: Option<usize>) {
    for (name, result) in [
        ("simple", finders.0.get_index(key)),
        ("binary", finders.1.get_index(key)),
        ("inmemory", finders.2.get_index(key)),
    ] {
        match expected {
            Some(idx) => assert_eq!(result.unwrap(), idx, "{name} finder disagreed"),
            None => assert_eq!(
                result.unwrap_err().kind(),
                Kind::KeyNotFound,
                "{name} finder should report KeyNotFound"
            ),
        }
    }
}

#[test]
fn e1_e2_small_reorder() {
    let dir = tempdir().unwrap();
    let path = build_db(dir.path(), 128, 5, &[3, 1]);
    let finders = open_all_finders(&path, 128, 5);
    assert_all_agree(&finders, &key_at(1), Some(2)); // E1
    assert_all_agree(&finders, &key_at(3), Some(1)); // E2
}

#[test]
fn e3_e4_e5_fifteen_row_stress_table() {
    let dir = tempdir().unwrap();
    let timestamps = [
        100, 110, 101, 109, 102, 108, 103, 107, 104, 106, 105, 114, 113, 112, 111,
    ];
    let path = build_db(dir.path(), 128, 5, &timestamps);
    let finders = open_all_finders(&path, 128, 5);
    assert_all_agree(&finders, &key_at(105), Some(11)); // E3
    assert_all_agree(&finders, &key_at(100), Some(1)); // E4
    assert_all_agree(&finders, &key_at(114), Some(12)); // E5
}

#[test]
fn e6_key_not_found_between_clusters() {
    let dir = tempdir().unwrap();
    let timestamps = [10, 12, 11, 14, 13, 100, 102, 101, 104, 103];
    let path = build_db(dir.path(), 128, 5, &timestamps);
    let finders = open_all_finders(&path, 128, 5);
    assert_all_agree(&finders, &key_at(50), None); // E6
}

#[test]
fn get_index_rejects_malformed_keys() {
    let dir = tempdir().unwrap();
    let path = build_db(dir.path(), 128, 5, &[1, 2, 3]);
    let finders = open_all_finders(&path, 128, 5);
    for finder in [&finders.0 as &dyn Finder, &finders.1, &finders.2] {
        assert_eq!(finder.get_index(&Uuid::nil()).unwrap_err().kind(), Kind::InvalidInput);
        assert_eq!(
            finder.get_index(&make_nullrow_uuid(42)).unwrap_err().kind(),
            Kind::InvalidInput
        );
        let mut bytes = *Uuid::new_v4().as_bytes();
        bytes[6] = (4 << 4) | (bytes[6] & 0x0f);
        let v4 = Uuid::from_bytes(bytes);
        assert_eq!(finder.get_index(&v4).unwrap_err().kind(), Kind::InvalidInput);
    }
}

#[test]
fn transaction_boundary_idempotence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.fdb");
    Handle::create(&path, 128, 5).unwrap();
    let handle = Handle::open(&path, Mode::Write, FinderKind::Simple).unwrap();
    let mut tx = handle.begin_tx().unwrap();
    tx.add_row(key_at(1), br#"{"a":1}"#.to_vec()).unwrap();
    tx.savepoint().unwrap();
    tx.add_row(key_at(2), br#"{"a":2}"#.to_vec()).unwrap();
    tx.commit().unwrap();
    handle.close().unwrap();

    let finders = open_all_finders(&path, 128, 5);
    for finder in [&finders.0 as &dyn Finder, &finders.1, &finders.2] {
        let i1 = finder.get_index(&key_at(1)).unwrap();
        let i2 = finder.get_index(&key_at(2)).unwrap();
        let start1 = finder.get_transaction_start(i1).unwrap();
        let end1 = finder.get_transaction_end(i1).unwrap();
        let start2 = finder.get_transaction_start(i2).unwrap();
        let end2 = finder.get_transaction_end(i2).unwrap();
        assert_eq!(start1, start2);
        assert_eq!(end1, end2);
        assert_eq!(finder.get_transaction_start(end1).unwrap(), start1);
        assert_eq!(finder.get_transaction_end(start1).unwrap(), end1);
    }
}

#[test]
fn get_index_rejects_checksum_row_index_for_boundaries() {
    let dir = tempdir().unwrap();
    let path = build_db(dir.path(), 128, 5, &[1, 2]);
    let finders = open_all_finders(&path, 128, 5);
    for finder in [&finders.0 as &dyn Finder, &finders.1, &finders.2] {
        assert_eq!(
            finder.get_transaction_start(0).unwrap_err().kind(),
            Kind::InvalidInput
        );
        assert_eq!(
            finder.get_transaction_end(0).unwrap_err().kind(),
            Kind::InvalidInput
        );
    }
}

/// Reduced version of the spec's 20,001-row scenario (§8.4 #5): enough rows
/// to cross exactly one periodic checksum boundary, verifying every Finder
/// implementation agrees on every key both before and after it.
#[test]
fn finder_parity_across_a_checksum_boundary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("a.fdb");
    let row_size = 128u32;
    let skew_ms = 60_000i64;
    Handle::create(&path, row_size, skew_ms).unwrap();
    let handle = Handle::open(&path, Mode::Write, FinderKind::Simple).unwrap();

    let n = frozendb::MAX_ROWS_PER_BLOCK + 1;
    let base_ts = 1_700_000_000_000i64;
    for i in 0..n {
        let mut tx = handle.begin_tx().unwrap();
        tx.add_row(key_at(base_ts + i as i64), br#"{}"#.to_vec()).unwrap();
        tx.commit().unwrap();
    }
    handle.close().unwrap();

    let finders = open_all_finders(&path, row_size, skew_ms);
    for i in 0..n {
        let key = key_at(base_ts + i as i64);
        for finder in [&finders.0 as &dyn Finder, &finders.1, &finders.2] {
            assert!(finder.get_index(&key).is_ok(), "row {i} missing");
        }
    }
    assert!(finders.0.get_index(&key_at(base_ts - 1)).is_err());
}
