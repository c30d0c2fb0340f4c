//! `BinarySearchFinder`: exploits the near-sortedness of UUIDv7 timestamps
//! (`ts(key_i) + skew_ms ≥ ts(prev_key)`) to locate a key in O(log n + k),
//! where k is the number of keys within `skew_ms` of the target.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;
use uuid::Uuid;

use super::{
    read_row, row_timestamp, scan_max_timestamp_full, scan_transaction_end,
    scan_transaction_start, Finder, Tombstone,
};
use crate::error::{Error, Kind, Result};
use crate::file_manager::FileManager;
use crate::row::RowKind;
use crate::uuid7;

/// Time-ordered, disk-backed Finder. Caches only `visible_count`,
/// `max_timestamp`, and `skew_ms`; every lookup re-reads candidate rows.
pub struct BinarySearchFinder {
    file_manager: Arc<FileManager>,
    skew_ms: i64,
    visible_count: AtomicUsize,
    max_timestamp: AtomicI64,
    tombstone: Tombstone,
}

impl BinarySearchFinder {
    /// Construct against an already-open file manager, seeded with the row
    /// count and timestamp high-water mark observed as of open time.
    pub fn new(file_manager: Arc<FileManager>, initial_row_count: usize, skew_ms: i64) -> Result<Self> {
        let initial_max_timestamp = scan_max_timestamp_full(&file_manager)?;
        Ok(BinarySearchFinder {
            file_manager,
            skew_ms,
            visible_count: AtomicUsize::new(initial_row_count),
            max_timestamp: AtomicI64::new(initial_max_timestamp),
            tombstone: Tombstone::new(),
        })
    }

    fn count(&self) -> usize {
        self.visible_count.load(Ordering::Acquire)
    }

    /// Timestamp of the row at `index`, or `None` for a checksum row.
    fn ts_at(&self, index: usize) -> Result<Option<i64>> {
        Ok(row_timestamp(&read_row(&self.file_manager, index)?))
    }

    /// The first keyed (non-checksum) row at or after `from`, within `limit`
    /// (exclusive).
    fn nearest_keyed(&self, from: usize, limit: usize) -> Result<Option<usize>> {
        let mut i = from;
        while i < limit {
            if self.ts_at(i)?.is_some() {
                return Ok(Some(i));
            }
            i += 1;
        }
        Ok(None)
    }

    /// Binary search for a keyed index whose timestamp is at or near
    /// `target_ts`. Checksum rows in probed positions are skipped by
    /// widening the search toward the nearest keyed neighbor.
    fn bracket(&self, target_ts: i64) -> Result<Option<usize>> {
        let mut lo = 0usize;
        let mut hi = self.count();
        let mut best = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let Some(probe) = self.nearest_keyed(mid, hi)? else {
                hi = mid;
                continue;
            };
            let ts = self
                .ts_at(probe)?
                .expect("nearest_keyed only returns keyed rows");
            best = Some(probe);
            match ts.cmp(&target_ts) {
                std::cmp::Ordering::Equal => return Ok(Some(probe)),
                std::cmp::Ordering::Less => lo = probe + 1,
                std::cmp::Ordering::Greater => hi = probe,
            }
        }
        Ok(best)
    }

    /// Expand outward from `center`, collecting every keyed index within
    /// `skew_ms` of `target_ts`. The ordering invariant bounds this scan: once
    /// a direction's timestamps fall definitively outside the window it is
    /// abandoned.
    fn skew_window(&self, center: usize, target_ts: i64) -> Result<SmallVec<[usize; 8]>> {
        let count = self.count();
        let mut indices = SmallVec::new();

        let mut i = center;
        loop {
            match self.ts_at(i)? {
                Some(ts) if (ts - target_ts).abs() <= self.skew_ms => indices.push(i),
                Some(ts) if ts < target_ts - self.skew_ms => break,
                _ => {}
            }
            if i == 0 {
                break;
            }
            i -= 1;
        }

        let mut i = center + 1;
        while i < count {
            match self.ts_at(i)? {
                Some(ts) if (ts - target_ts).abs() <= self.skew_ms => indices.push(i),
                Some(ts) if ts > target_ts + self.skew_ms => break,
                _ => {}
            }
            i += 1;
        }

        Ok(indices)
    }
}

impl Finder for BinarySearchFinder {
    fn get_index(&self, key: &Uuid) -> Result<usize> {
        self.tombstone.check()?;
        uuid7::validate_uuidv7(key)?;
        if uuid7::is_nullrow_uuid(key) {
            return Err(Error::invalid_input("NullRow-shaped UUID is never a DataRow key"));
        }
        let target_ts = uuid7::extract_ts_ms(key);
        let Some(center) = self.bracket(target_ts)? else {
            return Err(Error::new(Kind::KeyNotFound, format!("key {key} not found")));
        };
        for i in self.skew_window(center, target_ts)? {
            if let RowKind::Data(row) = read_row(&self.file_manager, i)? {
                if &row.key == key {
                    return Ok(i);
                }
            }
        }
        Err(Error::new(Kind::KeyNotFound, format!("key {key} not found")))
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
            let count = self.count();
            if index != count {
                return Err(Error::invalid_input(format!(
                    "on_row_added called out of order: index {index}, expected {count}"
                )));
            }
            if let Some(ts) = row_timestamp(row) {
                let mut current = self.max_timestamp.load(Ordering::Acquire);
                while ts > current {
                    match self.max_timestamp.compare_exchange_weak(
                        current,
                        ts,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(observed) => current = observed,
                    }
                }
            }
            Ok(())
        })() {
            return Err(self.tombstone.set(err));
        }
        self.visible_count.store(index + 1, Ordering::Release);
        Ok(())
    }

    fn max_timestamp(&self) -> i64 {
        self.max_timestamp.load(Ordering::Acquire)
    }
}
