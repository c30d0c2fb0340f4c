//! The Finder protocol: locate a DataRow by UUIDv7 key, compute transaction
//! boundaries, and receive row-added notifications — with three
//! implementations trading memory for lookup cost.

/// `BinarySearchFinder`, the time-ordered disk-backed implementation.
pub mod binary;
/// `InMemoryFinder`, the hash-indexed implementation.
pub mod inmemory;
/// `SimpleFinder`, the linear-scan correctness baseline.
pub mod simple;

pub use binary::BinarySearchFinder;
pub use inmemory::InMemoryFinder;
pub use simple::SimpleFinder;

use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Kind, Result};
use crate::file_manager::FileManager;
use crate::header::HEADER_SIZE;
use crate::row::RowKind;
use crate::uuid7;

/// Which Finder implementation to construct at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderKind {
    /// O(row_size) memory, O(n) `GetIndex`; correctness baseline.
    Simple,
    /// O(1) memory beyond `size`/`max_timestamp`; O(log n + k) `GetIndex`
    /// exploiting the timestamp-ordering invariant.
    Binary,
    /// O(n) memory; O(1) `GetIndex` and transaction-boundary lookups.
    InMemory,
}

/// Locates rows by key and resolves transaction boundaries.
pub trait Finder: Send + Sync {
    /// Find the index of the unique DataRow with key `key`, regardless of
    /// whether its transaction ultimately committed or rolled back.
    fn get_index(&self, key: &Uuid) -> Result<usize>;

    /// Find the index of the first row (`start_control = T`) of the
    /// transaction containing `index`.
    fn get_transaction_start(&self, index: usize) -> Result<usize>;

    /// Find the index of the terminal row of the transaction containing
    /// `index`, or `Kind::TransactionActive` if it is still open at EOF.
    fn get_transaction_end(&self, index: usize) -> Result<usize>;

    /// Notify the Finder that the complete row `row` is now durable and
    /// visible at `index`. Must be called in strictly increasing index order.
    fn on_row_added(&self, index: usize, row: &RowKind) -> Result<()>;

    /// The largest UUIDv7 timestamp observed among any DataRow/NullRow so far.
    fn max_timestamp(&self) -> i64;
}

/// Shared tombstoning discipline: once any `on_row_added` call fails, every
/// subsequent public method call fails with the same `Kind::Tombstoned`
/// error, permanently, with no recovery path.
#[derive(Default)]
pub(crate) struct Tombstone {
    cause: Mutex<Option<(Kind, String, Option<u64>)>>,
}

impl Tombstone {
    pub(crate) fn new() -> Self {
        Tombstone::default()
    }

    /// Return the stored tombstone error, if one has been set.
    pub(crate) fn check(&self) -> Result<()> {
        if let Some((kind, message, offset)) = self.cause.lock().clone() {
            let mut err = Error::tombstoned(format!("finder previously failed with {kind:?}: {message}"));
            if let Some(offset) = offset {
                err = err.with_offset(offset);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Record the tombstone cause, first-wins. Returns the same error back to
    /// the caller so `on_row_added` can both tombstone and propagate.
    pub(crate) fn set(&self, err: Error) -> Error {
        let mut guard = self.cause.lock();
        if guard.is_none() {
            error!("finder tombstoned: {err}");
            *guard = Some((err.kind(), err.to_string(), err.offset()));
        }
        err
    }
}

/// Number of complete rows currently addressable: `(size - HEADER_SIZE) / row_size`,
/// ignoring any trailing partial row.
pub(crate) fn complete_row_count(file_manager: &FileManager) -> usize {
    let size = file_manager.size();
    if size <= HEADER_SIZE as u64 {
        return 0;
    }
    ((size - HEADER_SIZE as u64) / file_manager.row_size() as u64) as usize
}

pub(crate) fn byte_offset(index: usize, row_size: u32) -> u64 {
    HEADER_SIZE as u64 + index as u64 * row_size as u64
}

/// Read and decode the complete row at `index`.
pub(crate) fn read_row(file_manager: &FileManager, index: usize) -> Result<RowKind> {
    let offset = byte_offset(index, file_manager.row_size());
    let bytes = file_manager.read(offset, file_manager.row_size() as usize)?;
    crate::row::unmarshal(&bytes, file_manager.row_size())
}

/// Validate an index argument shared by `get_transaction_start`/`get_transaction_end`:
/// in range against this Finder's own `visible_count` (never the FileManager's
/// shared size directly — see the module-level note on visibility), and not a
/// checksum row.
pub(crate) fn validate_boundary_index(
    file_manager: &FileManager,
    visible_count: usize,
    index: usize,
) -> Result<RowKind> {
    if index >= visible_count {
        return Err(Error::invalid_input(format!(
            "index {index} out of range (only {visible_count} complete rows visible)"
        )));
    }
    let row = read_row(file_manager, index)?;
    if matches!(row, RowKind::Checksum(_)) {
        return Err(Error::invalid_input(format!(
            "index {index} refers to a checksum row"
        )));
    }
    Ok(row)
}

/// Shared backward scan for `get_transaction_start`, skipping checksum rows.
pub(crate) fn scan_transaction_start(
    file_manager: &FileManager,
    visible_count: usize,
    index: usize,
) -> Result<usize> {
    let row = validate_boundary_index(file_manager, visible_count, index)?;
    if row.start_control() == crate::control::StartControl::Transaction {
        return Ok(index);
    }
    let mut i = index;
    while i > 0 {
        i -= 1;
        let row = read_row(file_manager, i)?;
        if matches!(row, RowKind::Checksum(_)) {
            continue;
        }
        if row.start_control() == crate::control::StartControl::Transaction {
            return Ok(i);
        }
    }
    Err(Error::corruption(format!(
        "no transaction start found scanning backward from index {index}"
    )))
}

/// Shared forward scan for `get_transaction_end`, skipping checksum rows.
pub(crate) fn scan_transaction_end(
    file_manager: &FileManager,
    visible_count: usize,
    index: usize,
) -> Result<usize> {
    let row = validate_boundary_index(file_manager, visible_count, index)?;
    if row.end_control().is_transaction_terminal() {
        return Ok(index);
    }
    let mut i = index;
    loop {
        i += 1;
        if i >= visible_count {
            return Err(Error::new(
                Kind::TransactionActive,
                "transaction open at end of file",
            ));
        }
        let row = read_row(file_manager, i)?;
        if matches!(row, RowKind::Checksum(_)) {
            continue;
        }
        if row.end_control().is_transaction_terminal() {
            return Ok(i);
        }
    }
}

/// Shared linear `get_index` scan used by `SimpleFinder`.
pub(crate) fn linear_get_index(
    file_manager: &FileManager,
    visible_count: usize,
    key: &Uuid,
) -> Result<usize> {
    uuid7::validate_uuidv7(key)?;
    if uuid7::is_nullrow_uuid(key) {
        return Err(Error::invalid_input("NullRow-shaped UUID is never a DataRow key"));
    }
    for i in 0..visible_count {
        if let RowKind::Data(row) = read_row(file_manager, i)? {
            if &row.key == key {
                return Ok(i);
            }
        }
    }
    Err(Error::new(Kind::KeyNotFound, format!("key {key} not found")))
}

/// Track the maximum observed DataRow/NullRow timestamp.
pub(crate) struct MaxTimestamp(parking_lot::RwLock<i64>);

impl MaxTimestamp {
    pub(crate) fn new(initial: i64) -> Self {
        MaxTimestamp(parking_lot::RwLock::new(initial))
    }

    pub(crate) fn observe(&self, ts: i64) {
        let mut guard = self.0.write();
        if ts > *guard {
            *guard = ts;
        }
    }

    pub(crate) fn get(&self) -> i64 {
        *self.0.read()
    }
}

pub(crate) fn row_timestamp(row: &RowKind) -> Option<i64> {
    match row {
        RowKind::Data(r) => Some(uuid7::extract_ts_ms(&r.key)),
        RowKind::Null(r) => Some(uuid7::extract_ts_ms(&r.key)),
        RowKind::Checksum(_) => None,
    }
}

/// Initialize `max_timestamp` by scanning the whole file once (used by
/// `InMemoryFinder` and at `BinarySearchFinder`/`SimpleFinder` construction
/// when a full initial scan is cheaper than a bounded backward one).
pub(crate) fn scan_max_timestamp_full(file_manager: &FileManager) -> Result<i64> {
    let count = complete_row_count(file_manager);
    let mut max_ts = i64::MIN;
    for i in 0..count {
        if let Some(ts) = row_timestamp(&read_row(file_manager, i)?) {
            max_ts = max_ts.max(ts);
        }
    }
    Ok(if max_ts == i64::MIN { 0 } else { max_ts })
}

/// Initialize `max_timestamp` by scanning backward until `skew_ms` worth of
/// rows have been examined or the head of the file is reached (the
/// `SimpleFinder` open-time strategy: bounded rather than full).
pub(crate) fn scan_max_timestamp_bounded(file_manager: &FileManager, skew_ms: i64) -> Result<i64> {
    let count = complete_row_count(file_manager);
    let mut max_ts = i64::MIN;
    let mut examined: i64 = 0;
    let mut i = count;
    while i > 0 && examined < skew_ms.max(1) {
        i -= 1;
        if let Some(ts) = row_timestamp(&read_row(file_manager, i)?) {
            max_ts = max_ts.max(ts);
            examined += 1;
        }
    }
    Ok(if max_ts == i64::MIN { 0 } else { max_ts })
}

/// A type-erased, shared handle to any Finder implementation.
pub type SharedFinder = Arc<dyn Finder>;
