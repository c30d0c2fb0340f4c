//! The transaction state machine: builds DataRows one at a time, enforcing
//! the 100-rows/9-savepoints caps, key uniqueness, and the skew-ordering
//! invariant, before handing each finished row to the `FileManager`.
//!
//! A row is never written until its fate (continue, commit, or rollback) is
//! known: the in-progress row stays a [`PartialDataRow`] until the *next*
//! transaction action decides its end-control, at which point it is
//! finalized and appended, and a fresh `PartialDataRow` opens for whatever
//! comes next.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::control::StartControl;
use crate::error::{Error, Kind, Result};
use crate::file_manager::FileManager;
use crate::finder::{Finder, SharedFinder};
use crate::integrity::ChecksumScheduler;
use crate::row::{marshal, PartialDataRow, RowKind};
use crate::uuid7;

/// Maximum number of DataRows a single transaction may contain.
pub const MAX_ROWS_PER_TRANSACTION: usize = 100;
/// Maximum number of savepoints a single transaction may record.
pub const MAX_SAVEPOINTS_PER_TRANSACTION: u8 = 9;

/// A transaction in progress on a write-mode `Handle`.
///
/// Dropping a `Tx` without calling [`Tx::commit`] or [`Tx::rollback`] does
/// NOT release the handle's single-transaction lock: whatever rows were
/// already flushed remain on disk as an unterminated transaction, and only
/// closing and reopening the handle can recover from that state. This
/// mirrors what a real crash mid-transaction leaves behind.
pub struct Tx<'a> {
    file_manager: &'a FileManager,
    finder: &'a SharedFinder,
    checksum_scheduler: &'a ChecksumScheduler,
    skew_ms: i64,
    active: Arc<AtomicBool>,
    pending: Option<PartialDataRow>,
    row_count: usize,
    savepoint_count: u8,
    /// Keys staged so far in this transaction, including rows already rolled
    /// forward to disk as a `Continue` row: the Finder can't see those as
    /// duplicates until the whole transaction resolves, since their fate
    /// isn't decided yet, so this is the only place intra-transaction
    /// uniqueness can be checked.
    staged_keys: HashSet<Uuid>,
}

impl<'a> Tx<'a> {
    pub(crate) fn begin(
        file_manager: &'a FileManager,
        finder: &'a SharedFinder,
        checksum_scheduler: &'a ChecksumScheduler,
        row_size: u32,
        skew_ms: i64,
        active: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Tx {
            file_manager,
            finder,
            checksum_scheduler,
            skew_ms,
            active,
            pending: Some(PartialDataRow::new(row_size, StartControl::Transaction)?),
            row_count: 0,
            savepoint_count: 0,
            staged_keys: HashSet::new(),
        })
    }

    fn row_size(&self) -> u32 {
        self.file_manager.row_size()
    }

    /// Flush the current pending row with `continuation` as its end-control
    /// intent, and open a fresh one with `start_control = Continuation`.
    fn roll_pending_forward(&mut self) -> Result<()> {
        let finished = self
            .pending
            .take()
            .expect("pending row always present between transaction actions")
            .end_row()?;
        self.append(RowKind::Data(finished))?;
        self.pending = Some(PartialDataRow::new(self.row_size(), StartControl::Continuation)?);
        Ok(())
    }

    fn append(&self, row: RowKind) -> Result<usize> {
        let bytes = marshal(&row, self.row_size())?;
        let index = self.file_manager.append(bytes)?;
        self.checksum_scheduler.record_row(self.file_manager)?;
        Ok(index)
    }

    /// Validate and stage a new key/value row. Rejects nil/non-v7/NullRow-
    /// shaped keys, empty values, oversized values, duplicate keys, keys
    /// violating the skew-ordering invariant, and the per-transaction row cap.
    pub fn add_row(&mut self, key: Uuid, value: Vec<u8>) -> Result<()> {
        if self.row_count >= MAX_ROWS_PER_TRANSACTION {
            return Err(Error::invalid_input(format!(
                "transaction already has the maximum {MAX_ROWS_PER_TRANSACTION} rows"
            )));
        }
        uuid7::validate_uuidv7(&key)?;
        if uuid7::is_nullrow_uuid(&key) {
            return Err(Error::invalid_input("NullRow-shaped UUID is not a valid DataRow key"));
        }
        if self.staged_keys.contains(&key) {
            return Err(Error::invalid_input(format!(
                "key {key} already staged earlier in this transaction"
            )));
        }
        match self.finder.get_index(&key) {
            Ok(_) => return Err(Error::invalid_input(format!("key {key} already present"))),
            Err(e) if e.kind() == Kind::KeyNotFound => {}
            Err(e) => return Err(e),
        }
        let ts = uuid7::extract_ts_ms(&key);
        let prev_max = self.finder.max_timestamp();
        if ts + self.skew_ms < prev_max {
            return Err(Error::invalid_input(format!(
                "key timestamp {ts} violates skew-ordering invariant against max_timestamp {prev_max} (skew_ms {})",
                self.skew_ms
            )));
        }

        if self
            .pending
            .as_ref()
            .expect("pending row always present between transaction actions")
            .has_payload()
        {
            self.roll_pending_forward()?;
        }
        self.pending
            .as_mut()
            .expect("pending row always present between transaction actions")
            .add_row(key, value)?;
        self.staged_keys.insert(key);
        self.row_count += 1;
        Ok(())
    }

    /// Record a savepoint on the most recently added row. At most
    /// [`MAX_SAVEPOINTS_PER_TRANSACTION`] per transaction.
    pub fn savepoint(&mut self) -> Result<()> {
        if self.savepoint_count >= MAX_SAVEPOINTS_PER_TRANSACTION {
            return Err(Error::invalid_input(format!(
                "transaction already has the maximum {MAX_SAVEPOINTS_PER_TRANSACTION} savepoints"
            )));
        }
        self.pending
            .as_mut()
            .expect("pending row always present between transaction actions")
            .savepoint()?;
        self.savepoint_count += 1;
        Ok(())
    }

    /// Commit the transaction: the pending row is finalized with `TC`/`SC`.
    pub fn commit(mut self) -> Result<()> {
        let finished = self.take_pending_for_termination()?.commit()?;
        self.append(RowKind::Data(finished))?;
        self.active.store(false, Ordering::Release);
        debug!("transaction committed ({} rows)", self.row_count);
        Ok(())
    }

    /// Roll back to savepoint `target` (`0` = full rollback). The pending
    /// row is finalized with `Rk`/`Sk`.
    pub fn rollback(mut self, target: u8) -> Result<()> {
        if target > self.savepoint_count {
            return Err(Error::invalid_input(format!(
                "rollback target {target} exceeds {} recorded savepoints",
                self.savepoint_count
            )));
        }
        let finished = self.take_pending_for_termination()?.rollback(target)?;
        self.append(RowKind::Data(finished))?;
        self.active.store(false, Ordering::Release);
        debug!("transaction rolled back to savepoint {target} ({} rows)", self.row_count);
        Ok(())
    }

    fn take_pending_for_termination(&mut self) -> Result<PartialDataRow> {
        let pending = self
            .pending
            .take()
            .expect("pending row always present between transaction actions");
        if !pending.has_payload() {
            return Err(Error::invalid_action(
                "cannot commit or roll back an empty transaction; use insert_null_row for an empty transaction",
            ));
        }
        Ok(pending)
    }
}
