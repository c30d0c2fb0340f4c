//! Start/end control bytes and their validity rules.
//!
//! Every row carries a one-byte `start_control` at offset 1 and a two-byte
//! `end_control` at `[N-5..N-4]`. This module is the single source of truth for
//! which combinations are legal and what they mean for transaction state.

use crate::error::{Error, Result};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// The byte at offset 1 of every row.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartControl {
    /// Transaction begin, or a NullRow.
    Transaction,
    /// Row continuation within an open transaction.
    Continuation,
    /// Checksum row.
    Checksum,
}

impl StartControl {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            StartControl::Transaction => b'T',
            StartControl::Continuation => b'R',
            StartControl::Checksum => b'C',
        }
    }

    pub(crate) fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'T' => Ok(StartControl::Transaction),
            b'R' => Ok(StartControl::Continuation),
            b'C' => Ok(StartControl::Checksum),
            _ => Err(Error::corruption(format!(
                "unknown start_control byte {b:#04x}"
            ))),
        }
    }
}

/// The two-byte sequence at `[N-5..N-4]`.
///
/// `RollbackTo`/`SavepointThenRollbackTo` carry a savepoint number in `1..=9`;
/// `0` denotes a full rollback and is represented by `RollbackFull`/
/// `SavepointThenRollbackFull`.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndControl {
    /// `TC` — commit, no savepoint on this row.
    Commit,
    /// `RE` — continue, no savepoint on this row.
    Continue,
    /// `SC` — commit, with a savepoint recorded on this row.
    SavepointThenCommit,
    /// `SE` — continue, with a savepoint recorded on this row.
    SavepointThenContinue,
    /// `R0` — full rollback.
    RollbackFull,
    /// `R1`..`R9` — rollback to savepoint N.
    RollbackTo(u8),
    /// `S0` — savepoint here, then full rollback.
    SavepointThenRollbackFull,
    /// `S1`..`S9` — savepoint here, then rollback to savepoint N.
    SavepointThenRollbackTo(u8),
    /// `CS` — checksum row terminator.
    ChecksumTerminator,
    /// `NR` — null row (single-row empty transaction).
    NullRow,
}

impl EndControl {
    pub(crate) fn to_bytes(self) -> [u8; 2] {
        match self {
            EndControl::Commit => *b"TC",
            EndControl::Continue => *b"RE",
            EndControl::SavepointThenCommit => *b"SC",
            EndControl::SavepointThenContinue => *b"SE",
            EndControl::RollbackFull => *b"R0",
            EndControl::RollbackTo(n) => [b'R', b'0' + n],
            EndControl::SavepointThenRollbackFull => *b"S0",
            EndControl::SavepointThenRollbackTo(n) => [b'S', b'0' + n],
            EndControl::ChecksumTerminator => *b"CS",
            EndControl::NullRow => *b"NR",
        }
    }

    pub(crate) fn from_bytes(bytes: [u8; 2]) -> Result<Self> {
        Ok(match bytes {
            [b'T', b'C'] => EndControl::Commit,
            [b'R', b'E'] => EndControl::Continue,
            [b'S', b'C'] => EndControl::SavepointThenCommit,
            [b'S', b'E'] => EndControl::SavepointThenContinue,
            [b'R', b'0'] => EndControl::RollbackFull,
            [b'R', d @ b'1'..=b'9'] => EndControl::RollbackTo(d - b'0'),
            [b'S', b'0'] => EndControl::SavepointThenRollbackFull,
            [b'S', d @ b'1'..=b'9'] => EndControl::SavepointThenRollbackTo(d - b'0'),
            [b'C', b'S'] => EndControl::ChecksumTerminator,
            [b'N', b'R'] => EndControl::NullRow,
            _ => {
                return Err(Error::corruption(format!(
                    "unknown end_control bytes {:?}",
                    bytes.map(|b| b as char)
                )));
            }
        })
    }

    /// Whether this end-control records a savepoint on its row.
    pub(crate) fn sets_savepoint(self) -> bool {
        matches!(
            self,
            EndControl::SavepointThenCommit
                | EndControl::SavepointThenContinue
                | EndControl::SavepointThenRollbackFull
                | EndControl::SavepointThenRollbackTo(_)
        )
    }

    /// The savepoint number rolled back to, if this end-control is a rollback.
    pub(crate) fn rollback_target(self) -> Option<u8> {
        match self {
            EndControl::RollbackFull | EndControl::SavepointThenRollbackFull => Some(0),
            EndControl::RollbackTo(n) | EndControl::SavepointThenRollbackTo(n) => Some(n),
            _ => None,
        }
    }

    /// Whether this end-control is legal as the terminal row of a DataRow
    /// transaction (excludes `CS`, which only ever appears on ChecksumRow, and
    /// `NR`, which only ever appears alone on a NullRow).
    pub(crate) fn is_data_row_terminal(self) -> bool {
        !matches!(self, EndControl::ChecksumTerminator | EndControl::NullRow)
    }

    /// Whether this end-control closes its enclosing transaction: any of
    /// `*C`, `R[0-9]`, `S[0-9]`, or `NR`. Never meaningfully queried for `CS`
    /// (checksum rows are excluded from transaction-boundary scans).
    pub(crate) fn is_transaction_terminal(self) -> bool {
        !matches!(self, EndControl::Continue | EndControl::SavepointThenContinue)
    }
}
