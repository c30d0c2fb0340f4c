//! Fixed-width row framing: sentinels, payload slot, end-control, LRC parity,
//! terminal newline, shared by every row variant.
//!
//! A row is exactly `row_size` (`N`) bytes:
//!
//! ```text
//! [0]        = 0x1F                 ROW_START
//! [1]        = start_control
//! [2..N-6]   = payload + NUL padding
//! [N-5..N-4] = end_control
//! [N-3..N-2] = parity, two uppercase hex ASCII bytes
//! [N-1]      = 0x0A                 ROW_END
//! ```

/// `ChecksumRow`, the per-block CRC32 integrity row.
pub mod checksum;
/// `DataRow`, the UUIDv7-keyed value row.
pub mod data;
/// `NullRow`, the single-row empty transaction.
pub mod null;
/// `PartialDataRow`, the writer-side in-progress row state machine.
pub mod partial;

use crate::control::{EndControl, StartControl};
use crate::error::{Error, Result};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

pub use checksum::ChecksumRow;
pub use data::DataRow;
pub use null::NullRow;
pub use partial::PartialDataRow;

/// `0x1F`, the first byte of every complete row.
pub const ROW_START: u8 = 0x1F;
/// `0x0A`, the last byte of every complete row.
pub const ROW_END: u8 = 0x0A;

/// Offset of the start-control byte.
pub const START_CONTROL_OFFSET: usize = 1;
/// Offset at which the payload slot begins.
pub const PAYLOAD_OFFSET: usize = 2;

/// A fully decoded row of any variant.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    /// A key/value row.
    Data(DataRow),
    /// A single-row empty transaction.
    Null(NullRow),
    /// A block integrity checksum row.
    Checksum(ChecksumRow),
}

impl RowKind {
    /// The row's `start_control`.
    pub fn start_control(&self) -> StartControl {
        match self {
            RowKind::Data(r) => r.start_control,
            RowKind::Null(_) => StartControl::Transaction,
            RowKind::Checksum(_) => StartControl::Checksum,
        }
    }

    /// The row's `end_control`.
    pub fn end_control(&self) -> EndControl {
        match self {
            RowKind::Data(r) => r.end_control,
            RowKind::Null(_) => EndControl::NullRow,
            RowKind::Checksum(_) => EndControl::ChecksumTerminator,
        }
    }
}

/// Offsets derived from `row_size`, bounds-checked once up front so every
/// marshal/unmarshal call site can index directly.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameSpec {
    pub(crate) row_size: usize,
}

impl FrameSpec {
    pub(crate) fn new(row_size: u32) -> Result<Self> {
        let row_size = row_size as usize;
        if row_size < 31 {
            return Err(Error::invalid_input(format!(
                "row_size {row_size} too small to hold any row variant (minimum 31)"
            )));
        }
        Ok(FrameSpec { row_size })
    }

    /// `N - 5`, the offset one past the end of the payload slot (exclusive);
    /// the payload occupies bytes `[2, N-5)`, i.e. positions `2..=N-6`.
    pub(crate) fn payload_end(&self) -> usize {
        self.row_size - 5
    }

    /// `[N-5, N-4)`, the end-control bytes.
    pub(crate) fn end_control_range(&self) -> std::ops::Range<usize> {
        self.row_size - 5..self.row_size - 3
    }

    /// `[N-3, N-2)`, the parity bytes.
    pub(crate) fn parity_range(&self) -> std::ops::Range<usize> {
        self.row_size - 3..self.row_size - 1
    }

    /// The maximum number of JSON payload bytes a DataRow can carry: `N - 31`.
    pub(crate) fn max_data_payload(&self) -> usize {
        self.row_size - 31
    }
}

/// 8-bit LRC: XOR of every byte in `bytes[0..N-4]`.
pub(crate) fn compute_parity(frame: &[u8]) -> u8 {
    frame.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Encode an LRC value as two uppercase hex ASCII bytes.
pub(crate) fn encode_parity(parity: u8) -> [u8; 2] {
    let hex = format!("{parity:02X}");
    let bytes = hex.as_bytes();
    [bytes[0], bytes[1]]
}

/// Decode two uppercase hex ASCII bytes into an LRC value.
pub(crate) fn decode_parity(bytes: [u8; 2]) -> Result<u8> {
    let s = std::str::from_utf8(&bytes)
        .map_err(|_| Error::corruption("parity bytes are not valid ASCII"))?;
    if !s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()) {
        return Err(Error::corruption(format!(
            "parity bytes {s:?} are not uppercase hex"
        )));
    }
    u8::from_str_radix(s, 16).map_err(|_| Error::corruption(format!("invalid parity hex {s:?}")))
}

/// Allocate a zeroed `row_size`-byte frame, place the sentinels and
/// `start_control`, and return it for the variant-specific payload writer to
/// fill in before [`finish_frame`] is called.
pub(crate) fn start_frame(spec: FrameSpec, start_control: StartControl) -> Vec<u8> {
    let mut frame = vec![0u8; spec.row_size];
    frame[0] = ROW_START;
    frame[START_CONTROL_OFFSET] = start_control.to_byte();
    frame
}

/// Place `end_control`, compute and place the LRC parity, and place the
/// terminal `ROW_END`. The payload region `[2..payload_end)` must already be
/// written (NUL-padded) by the caller.
pub(crate) fn finish_frame(mut frame: Vec<u8>, spec: FrameSpec, end_control: EndControl) -> Vec<u8> {
    let ec_range = spec.end_control_range();
    frame[ec_range].copy_from_slice(&end_control.to_bytes());
    let parity = compute_parity(&frame[..spec.row_size - 4]);
    let parity_range = spec.parity_range();
    frame[parity_range].copy_from_slice(&encode_parity(parity));
    frame[spec.row_size - 1] = ROW_END;
    frame
}

/// Shared structural validation: length, sentinels, parity. Returns the decoded
/// `start_control` and `end_control` on success.
pub(crate) fn validate_frame(
    bytes: &[u8],
    spec: FrameSpec,
) -> Result<(StartControl, EndControl)> {
    if bytes.len() != spec.row_size {
        return Err(Error::corruption(format!(
            "row length {} != row_size {}",
            bytes.len(),
            spec.row_size
        )));
    }
    if bytes[0] != ROW_START {
        return Err(Error::corruption(format!(
            "bad ROW_START byte {:#04x}",
            bytes[0]
        )));
    }
    if bytes[spec.row_size - 1] != ROW_END {
        return Err(Error::corruption(format!(
            "bad ROW_END byte {:#04x}",
            bytes[spec.row_size - 1]
        )));
    }
    let start_control = StartControl::from_byte(bytes[START_CONTROL_OFFSET])?;
    let ec_range = spec.end_control_range();
    let end_control = EndControl::from_bytes([bytes[ec_range.start], bytes[ec_range.start + 1]])?;
    let parity_range = spec.parity_range();
    let parity_bytes = [bytes[parity_range.start], bytes[parity_range.start + 1]];
    let stored_parity = decode_parity(parity_bytes)?;
    let computed_parity = compute_parity(&bytes[..spec.row_size - 4]);
    if stored_parity != computed_parity {
        return Err(Error::corruption(format!(
            "parity mismatch: stored {stored_parity:#04x}, computed {computed_parity:#04x}"
        )));
    }
    Ok((start_control, end_control))
}

/// Verify only the parity of an already-framed row, without full structural
/// validation. Used by the integrity layer to re-check rows covered by a
/// trusted checksum boundary only lazily, and to check every row in a block
/// before a checksum row is computed over it.
pub fn verify_parity(bytes: &[u8]) -> Result<()> {
    if bytes.len() < 4 {
        return Err(Error::corruption("row too short to carry parity"));
    }
    let n = bytes.len();
    let stored = decode_parity([bytes[n - 3], bytes[n - 2]])?;
    let computed = compute_parity(&bytes[..n - 4]);
    if stored != computed {
        return Err(Error::corruption(format!(
            "parity mismatch: stored {stored:#04x}, computed {computed:#04x}"
        )));
    }
    Ok(())
}

/// Dispatch on `(start_control, end_control)` and fully decode a row, per the
/// table in the row-variant specification. The caller supplies `row_size` so
/// the variant's own unmarshal logic can locate its payload.
pub fn unmarshal(bytes: &[u8], row_size: u32) -> Result<RowKind> {
    let spec = FrameSpec::new(row_size)?;
    let (start_control, end_control) = validate_frame(bytes, spec)?;
    match (start_control, end_control) {
        (StartControl::Checksum, EndControl::ChecksumTerminator) => {
            Ok(RowKind::Checksum(ChecksumRow::decode_payload(bytes, spec)?))
        }
        (StartControl::Transaction, EndControl::NullRow) => {
            Ok(RowKind::Null(NullRow::decode_payload(bytes, spec)?))
        }
        (StartControl::Transaction | StartControl::Continuation, ec) if ec.is_data_row_terminal() => {
            Ok(RowKind::Data(DataRow::decode_payload(
                bytes,
                spec,
                start_control,
                end_control,
            )?))
        }
        _ => Err(Error::corruption(format!(
            "illegal (start_control, end_control) combination: ({start_control:?}, {end_control:?})"
        ))),
    }
}

/// Marshal any row variant to its fixed-width on-disk form.
pub fn marshal(row: &RowKind, row_size: u32) -> Result<Vec<u8>> {
    let spec = FrameSpec::new(row_size)?;
    match row {
        RowKind::Data(r) => r.encode(spec),
        RowKind::Null(r) => r.encode(spec),
        RowKind::Checksum(r) => r.encode(spec),
    }
}
