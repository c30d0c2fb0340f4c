//! DataRow: a UUIDv7 key plus an opaque JSON value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use crate::control::{EndControl, StartControl};
use crate::error::{Error, Result};
use crate::uuid7;

use super::{FrameSpec, PAYLOAD_OFFSET, finish_frame, start_frame};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Bytes of framing overhead around a DataRow's JSON payload:
/// `ROW_START + start_control + base64(uuid) + end_control + parity + ROW_END`.
pub const FRAMING_OVERHEAD: usize = 1 + 1 + 24 + 2 + 2 + 1;

/// A key/value row: 24-byte Base64 UUIDv7 key at `[2..26)`, followed by raw
/// JSON bytes NUL-padded out to the end-control.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    /// The row's UUIDv7 key.
    pub key: Uuid,
    /// Opaque JSON value bytes.
    pub value: Vec<u8>,
    /// `T` (first row of a transaction) or `R` (continuation).
    pub start_control: StartControl,
    /// Savepoint/termination/continuation intent for this row.
    pub end_control: EndControl,
}

impl DataRow {
    /// Construct a DataRow, validating the key shape and that `value` fits.
    pub fn new(
        key: Uuid,
        value: Vec<u8>,
        start_control: StartControl,
        end_control: EndControl,
        row_size: u32,
    ) -> Result<Self> {
        uuid7::validate_uuidv7(&key)?;
        if uuid7::is_nullrow_uuid(&key) {
            return Err(Error::invalid_input("NullRow-shaped UUID is not a valid DataRow key"));
        }
        if value.is_empty() {
            return Err(Error::invalid_input("DataRow value must be non-empty"));
        }
        let spec = FrameSpec::new(row_size)?;
        if value.len() > spec.max_data_payload() {
            return Err(Error::invalid_input(format!(
                "DataRow value of {} bytes exceeds maximum {} for row_size {row_size}",
                value.len(),
                spec.max_data_payload()
            )));
        }
        if !end_control.is_data_row_terminal() {
            return Err(Error::invalid_input(format!(
                "{end_control:?} is not a valid DataRow end_control"
            )));
        }
        Ok(DataRow {
            key,
            value,
            start_control,
            end_control,
        })
    }

    pub(crate) fn encode(&self, spec: FrameSpec) -> Result<Vec<u8>> {
        let key_b64 = BASE64.encode(self.key.as_bytes());
        debug_assert_eq!(key_b64.len(), 24);
        let value_end = PAYLOAD_OFFSET + 24 + self.value.len();
        if value_end > spec.payload_end() {
            return Err(Error::invalid_input(format!(
                "DataRow value of {} bytes does not fit in row_size {}",
                self.value.len(),
                spec.row_size
            )));
        }
        let mut frame = start_frame(spec, self.start_control);
        frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 24].copy_from_slice(key_b64.as_bytes());
        frame[PAYLOAD_OFFSET + 24..value_end].copy_from_slice(&self.value);
        // Remaining bytes up to payload_end are already NUL from start_frame's
        // zeroed allocation.
        Ok(finish_frame(frame, spec, self.end_control))
    }

    pub(crate) fn decode_payload(
        bytes: &[u8],
        spec: FrameSpec,
        start_control: StartControl,
        end_control: EndControl,
    ) -> Result<Self> {
        let key_start = PAYLOAD_OFFSET;
        let key_end = key_start + 24;
        if key_end > spec.payload_end() {
            return Err(Error::corruption("row_size too small to hold a DataRow key"));
        }
        let key_bytes = BASE64
            .decode(&bytes[key_start..key_end])
            .map_err(|e| Error::corruption(format!("invalid Base64 DataRow key: {e}")))?;
        let key_bytes: [u8; 16] = key_bytes
            .try_into()
            .map_err(|_| Error::corruption("decoded DataRow key is not 16 bytes"))?;
        let key = Uuid::from_bytes(key_bytes);
        uuid7::validate_uuidv7(&key)?;

        let payload_end = spec.payload_end();
        let json_region = &bytes[key_end..payload_end];
        let first_nul = json_region
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(json_region.len());
        if json_region[first_nul..].iter().any(|&b| b != 0) {
            return Err(Error::corruption("DataRow padding region is not all-NUL"));
        }
        let value = json_region[..first_nul].to_vec();
        if value.is_empty() {
            return Err(Error::corruption("DataRow value is empty"));
        }
        Ok(DataRow {
            key,
            value,
            start_control,
            end_control,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> Uuid {
        Uuid::from_bytes([
            0x01, 0x8f, 0x2a, 0x3b, 0x4c, 0x5d, 0x70, 0x00, 0x80, 0x00, 0, 0, 0, 0, 0, 1,
        ])
    }

    #[test]
    fn round_trip_small_row() {
        let row = DataRow::new(
            sample_key(),
            br#"{"x":1}"#.to_vec(),
            StartControl::Transaction,
            EndControl::Commit,
            128,
        )
        .unwrap();
        let bytes = row.encode(FrameSpec::new(128).unwrap()).unwrap();
        assert_eq!(bytes.len(), 128);
        let decoded =
            DataRow::decode_payload(&bytes, FrameSpec::new(128).unwrap(), row.start_control, row.end_control)
                .unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn rejects_oversized_value() {
        let value = vec![b'a'; 200];
        assert!(DataRow::new(
            sample_key(),
            value,
            StartControl::Transaction,
            EndControl::Commit,
            128
        )
        .is_err());
    }

    #[test]
    fn rejects_empty_value() {
        assert!(DataRow::new(
            sample_key(),
            Vec::new(),
            StartControl::Transaction,
            EndControl::Commit,
            128
        )
        .is_err());
    }

    #[test]
    fn rejects_nullrow_shaped_key() {
        let nullrow_key = crate::uuid7::make_nullrow_uuid(1000);
        assert!(DataRow::new(
            nullrow_key,
            br#"{}"#.to_vec(),
            StartControl::Transaction,
            EndControl::Commit,
            128
        )
        .is_err());
    }
}
