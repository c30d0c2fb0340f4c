//! Parity and block-CRC integrity checks.
//!
//! Row parity is cheap and may be skipped on single-row reads in the hot
//! path; a checksum row is the trusted integrity marker for everything it
//! covers, computed only after every row in the block has been
//! parity-verified.

use parking_lot::Mutex;

use crate::error::Result;
use crate::file_manager::FileManager;
use crate::header::HEADER_SIZE;
use crate::row::{self, ChecksumRow, RowKind, verify_parity};

/// Maximum number of complete data/null rows between two checksum rows.
pub const MAX_ROWS_PER_BLOCK: usize = 10_000;

/// Parity-verify every row in `rows`, short-circuiting on the first failure.
/// Called before computing the checksum row that will cover this block: a
/// failure here is fatal corruption that aborts the write.
pub fn verify_block_parity(rows: &[Vec<u8>]) -> Result<()> {
    for row in rows {
        verify_parity(row)?;
    }
    Ok(())
}

/// Compute the checksum row covering `bytes` (everything since the previous
/// checksum row, or file start for the mandatory first one).
pub fn compute_block_checksum(bytes: &[u8]) -> ChecksumRow {
    ChecksumRow::compute(bytes)
}

/// Verify a previously-recorded checksum row against the block bytes it claims
/// to cover.
pub fn verify_block_checksum(checksum: &ChecksumRow, bytes: &[u8]) -> Result<()> {
    checksum.verify(bytes)
}

/// Writer-side bookkeeping for when the next periodic checksum row is due.
///
/// Emits the checksum row immediately after the `MAX_ROWS_PER_BLOCK`th
/// complete data/null row since the previous checksum row (never deferred to
/// just before the next row) — one fixed, arbitrary choice among the two the
/// format leaves implementation-defined; readers tolerate either.
pub(crate) struct ChecksumScheduler {
    state: Mutex<SchedulerState>,
}

struct SchedulerState {
    /// Byte offset immediately after the most recent checksum row.
    block_start: u64,
    /// Complete data/null rows appended since `block_start`.
    rows_since_checksum: usize,
}

impl ChecksumScheduler {
    /// Reconstruct scheduler state by scanning backward from the end of the
    /// file to the most recent checksum row. Always terminates: index 0 is
    /// itself a mandatory checksum row.
    pub(crate) fn from_file(file_manager: &FileManager) -> Result<Self> {
        let row_size = file_manager.row_size();
        let count = crate::finder::complete_row_count(file_manager);
        let mut rows_since_checksum = 0usize;
        let mut i = count;
        while i > 0 {
            i -= 1;
            if matches!(crate::finder::read_row(file_manager, i)?, RowKind::Checksum(_)) {
                let block_start = crate::finder::byte_offset(i + 1, row_size);
                return Ok(ChecksumScheduler {
                    state: Mutex::new(SchedulerState {
                        block_start,
                        rows_since_checksum,
                    }),
                });
            }
            rows_since_checksum += 1;
        }
        Ok(ChecksumScheduler {
            state: Mutex::new(SchedulerState {
                block_start: HEADER_SIZE as u64,
                rows_since_checksum,
            }),
        })
    }

    /// Record one freshly appended complete data/null row. If this was the
    /// `MAX_ROWS_PER_BLOCK`th since the previous checksum row, parity-verify
    /// every row in the block and append the next checksum row covering it.
    pub(crate) fn record_row(&self, file_manager: &FileManager) -> Result<()> {
        let mut state = self.state.lock();
        state.rows_since_checksum += 1;
        if state.rows_since_checksum < MAX_ROWS_PER_BLOCK {
            return Ok(());
        }
        let row_size = file_manager.row_size() as usize;
        let block_end = file_manager.size();
        let block_bytes =
            file_manager.read(state.block_start, (block_end - state.block_start) as usize)?;
        let rows: Vec<Vec<u8>> = block_bytes.chunks(row_size).map(<[u8]>::to_vec).collect();
        verify_block_parity(&rows)?;
        let checksum = compute_block_checksum(&block_bytes);
        let bytes = row::marshal(&RowKind::Checksum(checksum), row_size as u32)?;
        file_manager.append(bytes)?;
        state.block_start = file_manager.size();
        state.rows_since_checksum = 0;
        Ok(())
    }
}
