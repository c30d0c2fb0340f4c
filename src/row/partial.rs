//! PartialDataRow: the forward-only state machine that assembles one row of a
//! transaction before its terminal end-control is known.
//!
//! A PartialDataRow only ever represents a single row under construction. Once
//! a transaction's writer decides the row's fate (commit, rollback, or plain
//! continuation) the PartialDataRow is consumed and turned into a complete
//! [`DataRow`]; if the row continues the transaction (`end_row`), the caller
//! starts a fresh PartialDataRow (`start_control = R`) for the next row.
//!
//! States, matching the three trailing-partial shapes a crashed writer can
//! leave at EOF:
//!
//! * S1 "start-only": `0x1F, start_control`.
//! * S2 "with payload": S1 + Base64(key) + JSON bytes + NUL padding.
//! * S3 "with savepoint intent": S2 + one trailing `S` byte.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use crate::control::{EndControl, StartControl};
use crate::error::{Error, Result};
use crate::uuid7;

use super::data::DataRow;
use super::{FrameSpec, PAYLOAD_OFFSET, ROW_START};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// S1: nothing written past the start-control byte.
    StartOnly,
    /// S2: key and value are known.
    WithPayload { key: Uuid, value: Vec<u8> },
    /// S3: as S2, plus a savepoint recorded on this row.
    WithSavepoint { key: Uuid, value: Vec<u8> },
}

/// The writer-side in-progress row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDataRow {
    row_size: u32,
    start_control: StartControl,
    state: State,
}

impl PartialDataRow {
    /// Begin a new partial row. `start_control` must be `Transaction` (the
    /// first row of a transaction) or `Continuation` (every subsequent row);
    /// `Checksum` is never valid here.
    pub fn new(row_size: u32, start_control: StartControl) -> Result<Self> {
        if matches!(start_control, StartControl::Checksum) {
            return Err(Error::invalid_action(
                "a PartialDataRow cannot begin with start_control=Checksum",
            ));
        }
        Ok(PartialDataRow {
            row_size,
            start_control,
            state: State::StartOnly,
        })
    }

    /// S1 -> S2: attach the row's key and JSON value.
    pub fn add_row(&mut self, key: Uuid, value: Vec<u8>) -> Result<()> {
        if self.state != State::StartOnly {
            return Err(Error::invalid_action("add_row is only legal from state S1"));
        }
        uuid7::validate_uuidv7(&key)?;
        if uuid7::is_nullrow_uuid(&key) {
            return Err(Error::invalid_input(
                "NullRow-shaped UUID is not a valid DataRow key",
            ));
        }
        if value.is_empty() {
            return Err(Error::invalid_input("DataRow value must be non-empty"));
        }
        let spec = FrameSpec::new(self.row_size)?;
        if value.len() > spec.max_data_payload() {
            return Err(Error::invalid_input(format!(
                "value of {} bytes exceeds maximum {} for row_size {}",
                value.len(),
                spec.max_data_payload(),
                self.row_size
            )));
        }
        self.state = State::WithPayload { key, value };
        Ok(())
    }

    /// S2 -> S3: record a savepoint on this row.
    pub fn savepoint(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::StartOnly) {
            State::WithPayload { key, value } => {
                self.state = State::WithSavepoint { key, value };
                Ok(())
            }
            other => {
                self.state = other;
                Err(Error::invalid_action("savepoint is only legal from state S2"))
            }
        }
    }

    /// Whether a savepoint has been recorded on this row (state S3).
    pub fn has_savepoint(&self) -> bool {
        matches!(self.state, State::WithSavepoint { .. })
    }

    /// Whether `add_row` has been called yet (state S2 or S3, vs. S1).
    pub fn has_payload(&self) -> bool {
        !matches!(self.state, State::StartOnly)
    }

    fn into_payload(self) -> Result<(Uuid, Vec<u8>, bool)> {
        match self.state {
            State::StartOnly => Err(Error::invalid_action(
                "state S1 has no payload to commit/rollback/continue",
            )),
            State::WithPayload { key, value } => Ok((key, value, false)),
            State::WithSavepoint { key, value } => Ok((key, value, true)),
        }
    }

    /// Finalize with a commit (`TC` from S2, `SC` from S3).
    pub fn commit(self) -> Result<DataRow> {
        let row_size = self.row_size;
        let start_control = self.start_control;
        let (key, value, has_savepoint) = self.into_payload()?;
        let end_control = if has_savepoint {
            EndControl::SavepointThenCommit
        } else {
            EndControl::Commit
        };
        DataRow::new(key, value, start_control, end_control, row_size)
    }

    /// Finalize with a rollback to savepoint `target` (`0` = full rollback).
    /// `Rk`/`Sk` from S2/S3 respectively.
    pub fn rollback(self, target: u8) -> Result<DataRow> {
        if target > 9 {
            return Err(Error::invalid_input(format!(
                "savepoint number {target} out of range [0, 9]"
            )));
        }
        let row_size = self.row_size;
        let start_control = self.start_control;
        let (key, value, has_savepoint) = self.into_payload()?;
        let end_control = match (has_savepoint, target) {
            (false, 0) => EndControl::RollbackFull,
            (false, n) => EndControl::RollbackTo(n),
            (true, 0) => EndControl::SavepointThenRollbackFull,
            (true, n) => EndControl::SavepointThenRollbackTo(n),
        };
        DataRow::new(key, value, start_control, end_control, row_size)
    }

    /// Finalize as a mid-transaction continuation (`RE` from S2, `SE` from S3).
    /// The caller must start a fresh `PartialDataRow` with
    /// `start_control = Continuation` for the transaction's next row.
    pub fn end_row(self) -> Result<DataRow> {
        let row_size = self.row_size;
        let start_control = self.start_control;
        let (key, value, has_savepoint) = self.into_payload()?;
        let end_control = if has_savepoint {
            EndControl::SavepointThenContinue
        } else {
            EndControl::Continue
        };
        DataRow::new(key, value, start_control, end_control, row_size)
    }

    /// Serialize the current in-progress state to the bytes a crashed writer
    /// would leave at EOF: no end-control, no parity, no terminal LF.
    ///
    /// S2 is NUL-padded out to the same payload boundary a complete row uses
    /// (`row_size - 5`), exactly as if the end-control were about to be
    /// appended; S3 is that plus one trailing `S` byte, the first byte of a
    /// future `S*` end-control.
    pub fn to_partial_bytes(&self) -> Vec<u8> {
        let mut out = vec![ROW_START, self.start_control.to_byte()];
        match &self.state {
            State::StartOnly => {}
            State::WithPayload { key, value } | State::WithSavepoint { key, value } => {
                let spec = FrameSpec::new(self.row_size).expect("validated at construction");
                out.extend_from_slice(BASE64.encode(key.as_bytes()).as_bytes());
                out.extend_from_slice(value);
                out.resize(spec.payload_end(), 0);
                if matches!(self.state, State::WithSavepoint { .. }) {
                    out.push(b'S');
                }
            }
        }
        out
    }

    /// Reconstruct a PartialDataRow from a trailing-partial byte region found
    /// at EOF during crash recovery. `row_size` cannot be recovered from the
    /// bytes alone and must be supplied by the caller (from the file header).
    /// State (S1/S2/S3) is deduced from the region's length, which is fixed
    /// for S2 (`row_size - 5`) and S3 (`row_size - 4`).
    pub fn from_partial_bytes(bytes: &[u8], row_size: u32) -> Result<Self> {
        if bytes.len() < 2 || bytes[0] != ROW_START {
            return Err(Error::corruption("trailing partial row missing ROW_START"));
        }
        let start_control = StartControl::from_byte(bytes[1])?;
        if bytes.len() == 2 {
            return PartialDataRow::new(row_size, start_control);
        }
        let spec = FrameSpec::new(row_size)?;
        let has_savepoint = match bytes.len() {
            n if n == spec.payload_end() => false,
            n if n == spec.payload_end() + 1 => true,
            n => {
                return Err(Error::corruption(format!(
                    "trailing partial row has unexpected length {n} for row_size {row_size}"
                )));
            }
        };
        let body = &bytes[PAYLOAD_OFFSET..spec.payload_end()];
        if has_savepoint && bytes[spec.payload_end()] != b'S' {
            return Err(Error::corruption(
                "trailing partial row's savepoint-intent byte is not 'S'",
            ));
        }
        if body.len() < 24 {
            return Err(Error::corruption("trailing partial row key is truncated"));
        }
        let (key_b64, value_region) = body.split_at(24);
        let key_bytes = BASE64
            .decode(key_b64)
            .map_err(|e| Error::corruption(format!("invalid Base64 partial row key: {e}")))?;
        let key_bytes: [u8; 16] = key_bytes
            .try_into()
            .map_err(|_| Error::corruption("decoded partial row key is not 16 bytes"))?;
        let key = Uuid::from_bytes(key_bytes);
        uuid7::validate_uuidv7(&key)?;
        let first_nul = value_region
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(value_region.len());
        if value_region[first_nul..].iter().any(|&b| b != 0) {
            return Err(Error::corruption("trailing partial row padding is not all-NUL"));
        }
        let value = value_region[..first_nul].to_vec();
        let mut row = PartialDataRow::new(row_size, start_control)?;
        row.state = State::WithPayload {
            key,
            value,
        };
        if has_savepoint {
            row.savepoint()?;
        }
        Ok(row)
    }
}
