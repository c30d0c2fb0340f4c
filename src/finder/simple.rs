//! `SimpleFinder`: the correctness baseline. O(row_size) memory, O(n) lookups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::{
    row_timestamp, scan_max_timestamp_bounded, scan_transaction_end, scan_transaction_start,
    linear_get_index, Finder, MaxTimestamp, Tombstone,
};
use crate::error::Result;
use crate::file_manager::FileManager;
use crate::row::RowKind;

/// Default window, in observed rows, for the bounded backward scan used to
/// seed `max_timestamp` at open time. Chosen to comfortably exceed any
/// expected UUIDv7 reordering skew without requiring a full-file scan.
const DEFAULT_SKEW_WINDOW: i64 = 64;

/// Linear-scan Finder: no auxiliary index beyond `max_timestamp`, every
/// `get_index` call walks from the first row it has not yet ruled out.
pub struct SimpleFinder {
    file_manager: Arc<FileManager>,
    /// Rows this Finder has itself been notified about via `on_row_added`,
    /// and therefore may expose through `get_index`/boundary queries. Never
    /// derived from `FileManager::size`, which can observe a row before this
    /// Finder's own callback for it has returned.
    visible_count: AtomicUsize,
    max_timestamp: MaxTimestamp,
    tombstone: Tombstone,
}

impl SimpleFinder {
    /// Construct a `SimpleFinder` against an already-open file manager.
    /// `initial_row_count` seeds this Finder's view of history as of open
    /// time (rows appended afterward arrive exclusively through
    /// `on_row_added`).
    pub fn new(file_manager: Arc<FileManager>, initial_row_count: usize) -> Result<Self> {
        let initial_max_timestamp =
            scan_max_timestamp_bounded(&file_manager, DEFAULT_SKEW_WINDOW)?;
        Ok(SimpleFinder {
            file_manager,
            visible_count: AtomicUsize::new(initial_row_count),
            max_timestamp: MaxTimestamp::new(initial_max_timestamp),
            tombstone: Tombstone::new(),
        })
    }

    fn count(&self) -> usize {
        self.visible_count.load(Ordering::Acquire)
    }
}

impl Finder for SimpleFinder {
    fn get_index(&self, key: &Uuid) -> Result<usize> {
        self.tombstone.check()?;
        linear_get_index(&self.file_manager, self.count(), key)
    }

    fn get_transaction_start(&self, index: usize) -> Result<usize> {
        self.tombstone.check()?;
        scan_transaction_start(&self.file_manager, self.count(), index)
    }

    fn get_transaction_end(&self, index: usize) -> Result<usize> {
        self.tombstone.check()?;
        scan_transaction_end(&self.file_manager, self.count(), index)
    }

    fn on_row_added(&self, index: usize, row: &RowKind) -> Result<()> {
        if let Err(err) = (|| -> Result<()> {
            self.tombstone.check()?;
            // Re-validate the row we're about to become visible for, using
            // the count as it stood before this call, so the index itself
            // can never be confused for one already visible.
            validate_index_not_ahead(index, self.count())?;
            if let Some(ts) = row_timestamp(row) {
                self.max_timestamp.observe(ts);
            }
            Ok(())
        })() {
            return Err(self.tombstone.set(err));
        }
        self.visible_count.store(index + 1, Ordering::Release);
        Ok(())
    }

    fn max_timestamp(&self) -> i64 {
        self.max_timestamp.get()
    }
}

fn validate_index_not_ahead(index: usize, count: usize) -> Result<()> {
    if index != count {
        return Err(crate::error::Error::invalid_input(format!(
            "on_row_added called out of order: index {index}, expected {count}"
        )));
    }
    Ok(())
}
