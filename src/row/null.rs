//! NullRow: a single-row, empty transaction carrying a UUIDv7-shaped but
//! randomness-zeroed, non-searchable key.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

use crate::control::{EndControl, StartControl};
use crate::error::{Error, Result};
use crate::uuid7;

use super::{FrameSpec, PAYLOAD_OFFSET, finish_frame, start_frame};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// `start_control=T, end_control=NR`; key is a NullRow UUID carrying the
/// Finder's `max_timestamp` at creation time.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullRow {
    /// NullRow-shaped UUIDv7 carrying the timestamp it was created with.
    pub key: Uuid,
}

impl NullRow {
    /// Build a NullRow for the given timestamp.
    pub fn new(ts_ms: i64) -> Self {
        NullRow {
            key: uuid7::make_nullrow_uuid(ts_ms),
        }
    }

    pub(crate) fn encode(&self, spec: FrameSpec) -> Result<Vec<u8>> {
        let key_end = PAYLOAD_OFFSET + 24;
        if key_end > spec.payload_end() {
            return Err(Error::invalid_input("row_size too small to hold a NullRow key"));
        }
        let mut frame = start_frame(spec, StartControl::Transaction);
        let key_b64 = BASE64.encode(self.key.as_bytes());
        frame[PAYLOAD_OFFSET..key_end].copy_from_slice(key_b64.as_bytes());
        Ok(finish_frame(frame, spec, EndControl::NullRow))
    }

    pub(crate) fn decode_payload(bytes: &[u8], spec: FrameSpec) -> Result<Self> {
        let key_start = PAYLOAD_OFFSET;
        let key_end = key_start + 24;
        if key_end > spec.payload_end() {
            return Err(Error::corruption("row_size too small to hold a NullRow key"));
        }
        if bytes[key_end..spec.payload_end()].iter().any(|&b| b != 0) {
            return Err(Error::corruption("NullRow padding region is not all-NUL"));
        }
        let key_bytes = BASE64
            .decode(&bytes[key_start..key_end])
            .map_err(|e| Error::corruption(format!("invalid Base64 NullRow key: {e}")))?;
        let key_bytes: [u8; 16] = key_bytes
            .try_into()
            .map_err(|_| Error::corruption("decoded NullRow key is not 16 bytes"))?;
        let key = Uuid::from_bytes(key_bytes);
        if !uuid7::is_nullrow_uuid(&key) {
            return Err(Error::corruption("NullRow key is not NullRow-shaped"));
        }
        Ok(NullRow { key })
    }
}
