//! ChecksumRow: an 8-byte standard Base64 encoding of the 4-byte
//! little-endian IEEE CRC32 over every byte since the previous checksum row
//! (or file start for the mandatory row at index 0).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::control::{EndControl, StartControl};
use crate::error::{Error, Result};

use super::{FrameSpec, PAYLOAD_OFFSET, finish_frame, start_frame};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// `start_control=C, end_control=CS`.
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumRow {
    /// CRC32 of every byte since the previous checksum row (or file start).
    pub crc32: u32,
}

impl ChecksumRow {
    /// Compute the CRC32 of `bytes` and wrap it as a ChecksumRow.
    pub fn compute(bytes: &[u8]) -> Self {
        ChecksumRow {
            crc32: crc32fast::hash(bytes),
        }
    }

    pub(crate) fn encode(&self, spec: FrameSpec) -> Result<Vec<u8>> {
        let payload_end = PAYLOAD_OFFSET + 8;
        if payload_end > spec.payload_end() {
            return Err(Error::invalid_input("row_size too small to hold a ChecksumRow"));
        }
        let mut frame = start_frame(spec, StartControl::Checksum);
        let encoded = BASE64.encode(self.crc32.to_le_bytes());
        debug_assert_eq!(encoded.len(), 8);
        frame[PAYLOAD_OFFSET..payload_end].copy_from_slice(encoded.as_bytes());
        Ok(finish_frame(frame, spec, EndControl::ChecksumTerminator))
    }

    pub(crate) fn decode_payload(bytes: &[u8], spec: FrameSpec) -> Result<Self> {
        let payload_start = PAYLOAD_OFFSET;
        let payload_end = payload_start + 8;
        if payload_end > spec.payload_end() {
            return Err(Error::corruption("row_size too small to hold a ChecksumRow"));
        }
        if bytes[payload_end..spec.payload_end()].iter().any(|&b| b != 0) {
            return Err(Error::corruption("ChecksumRow padding region is not all-NUL"));
        }
        let decoded = BASE64
            .decode(&bytes[payload_start..payload_end])
            .map_err(|e| Error::corruption(format!("invalid Base64 checksum payload: {e}")))?;
        let decoded: [u8; 4] = decoded
            .try_into()
            .map_err(|_| Error::corruption("decoded checksum payload is not 4 bytes"))?;
        Ok(ChecksumRow {
            crc32: u32::from_le_bytes(decoded),
        })
    }

    /// Verify that `self.crc32` matches the CRC32 of `bytes`.
    pub fn verify(&self, bytes: &[u8]) -> Result<()> {
        let actual = crc32fast::hash(bytes);
        if actual != self.crc32 {
            return Err(Error::corruption(format!(
                "CRC32 mismatch: stored {:#010x}, computed {actual:#010x}",
                self.crc32
            )));
        }
        Ok(())
    }
}
