//! frozenDB: a single-file, append-only, immutable key/value store.
//!
//! Keys are UUIDv7s; values are opaque JSON byte strings. Rows are fixed-width
//! and framed with sentinel bytes, an LRC parity byte pair, and periodic CRC32
//! checksum rows covering everything since the previous one. A single writer
//! and any number of readers may hold the file open concurrently: the writer
//! holds an exclusive advisory lock and appends through a dedicated thread,
//! readers watch the file for growth and decode newly-visible rows as they
//! land.
//!
//! Three [`finder::Finder`] implementations trade memory for lookup cost, and
//! a [`transaction::Tx`] builds up a multi-row, savepoint-capable transaction
//! one row at a time before any of it is committed to disk.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod control;
mod creator;
mod error;
mod file_manager;
mod finder;
mod handle;
mod header;
mod integrity;
mod row;
mod transaction;
mod uuid7;

pub use control::{EndControl, StartControl};
pub use creator::{FileCreator, NoopFileCreator};
pub use error::{Error, Kind, Result};
pub use file_manager::{FileManager, Mode, SubscriptionId};
pub use finder::{BinarySearchFinder, Finder, FinderKind, InMemoryFinder, SharedFinder, SimpleFinder};
pub use handle::Handle;
pub use header::{Header, HEADER_SIZE, ROW_SIZE_MAX, ROW_SIZE_MIN, SKEW_MS_MAX};
pub use integrity::MAX_ROWS_PER_BLOCK;
pub use row::{marshal, unmarshal, verify_parity, ChecksumRow, DataRow, NullRow, PartialDataRow, RowKind};
pub use transaction::{Tx, MAX_ROWS_PER_TRANSACTION, MAX_SAVEPOINTS_PER_TRANSACTION};
pub use uuid7::{extract_ts_ms, is_nullrow_uuid, make_nullrow_uuid, validate_uuidv7};
