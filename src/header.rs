//! The 64-byte file header.
//!
//! `{"sig":"fDB","ver":1,"row_size":<N>,"skew_ms":<S>}`, NUL-padded, terminated by
//! an LF at byte 63. The header is written once at file creation and never
//! modified again; it is not itself CRC'd — the mandatory first checksum row
//! covers it (see [`crate::row::checksum`]).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Total on-disk size of the header, in bytes.
pub const HEADER_SIZE: usize = 64;

const SIGNATURE: &str = "fDB";
const VERSION: u32 = 1;

pub const ROW_SIZE_MIN: u32 = 128;
pub const ROW_SIZE_MAX: u32 = 65536;
pub const SKEW_MS_MAX: i64 = 86_400_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderJson {
    sig: String,
    ver: u32,
    row_size: u32,
    skew_ms: i64,
}

/// The decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Row width `N`, in `[128, 65536]`.
    pub row_size: u32,
    /// Permitted clock skew between successive DataRow timestamps, in ms.
    pub skew_ms: i64,
}

impl Header {
    /// Construct a new header, validating `row_size` and `skew_ms` ranges.
    pub fn new(row_size: u32, skew_ms: i64) -> Result<Self> {
        if !(ROW_SIZE_MIN..=ROW_SIZE_MAX).contains(&row_size) {
            return Err(Error::invalid_input(format!(
                "row_size {row_size} out of range [{ROW_SIZE_MIN}, {ROW_SIZE_MAX}]"
            )));
        }
        if !(0..=SKEW_MS_MAX).contains(&skew_ms) {
            return Err(Error::invalid_input(format!(
                "skew_ms {skew_ms} out of range [0, {SKEW_MS_MAX}]"
            )));
        }
        Ok(Header { row_size, skew_ms })
    }

    /// Serialize to the fixed 64-byte on-disk representation.
    pub fn marshal(&self) -> Result<[u8; HEADER_SIZE]> {
        let json = HeaderJson {
            sig: SIGNATURE.to_string(),
            ver: VERSION,
            row_size: self.row_size,
            skew_ms: self.skew_ms,
        };
        let text = serde_json::to_vec(&json)
            .map_err(|e| Error::invalid_input(format!("header JSON encode failed: {e}")))?;
        if text.len() > HEADER_SIZE - 2 {
            return Err(Error::invalid_input("header JSON too long to fit in 64 bytes"));
        }
        let mut out = [0u8; HEADER_SIZE];
        out[..text.len()].copy_from_slice(&text);
        out[HEADER_SIZE - 1] = b'\n';
        Ok(out)
    }

    /// Parse the fixed 64-byte on-disk representation.
    pub fn unmarshal(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(Error::corruption(format!(
                "header must be {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[HEADER_SIZE - 1] != b'\n' {
            return Err(Error::corruption("header missing terminal LF at byte 63"));
        }
        let nul_start = bytes[..HEADER_SIZE - 1]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::corruption("header JSON never NUL-terminated"))?;
        if !(49..=58).contains(&nul_start) {
            return Err(Error::corruption(format!(
                "header JSON length {nul_start} out of expected range [49, 58]"
            )));
        }
        if bytes[nul_start..HEADER_SIZE - 1].iter().any(|&b| b != 0) {
            return Err(Error::corruption("header padding region is not all-NUL"));
        }
        let json: HeaderJson = serde_json::from_slice(&bytes[..nul_start])
            .map_err(|e| Error::corruption(format!("header JSON decode failed: {e}")))?;
        if json.sig != SIGNATURE {
            return Err(Error::corruption(format!(
                "header signature {:?} != {SIGNATURE:?}",
                json.sig
            )));
        }
        if json.ver != VERSION {
            return Err(Error::corruption(format!(
                "unsupported header version {}",
                json.ver
            )));
        }
        Header::new(json.row_size, json.skew_ms)
            .map_err(|e| Error::corruption(format!("header field out of range: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let h = Header::new(1024, 5000).unwrap();
        let bytes = h.marshal().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(bytes[HEADER_SIZE - 1], b'\n');
        let back = Header::unmarshal(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn rejects_bad_row_size() {
        assert!(Header::new(64, 0).is_err());
        assert!(Header::new(65537, 0).is_err());
    }

    #[test]
    fn rejects_bad_skew() {
        assert!(Header::new(1024, -1).is_err());
        assert!(Header::new(1024, 86_400_001).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(Header::unmarshal(&[0u8; 10]).is_err());
    }

    #[test]
    fn rejects_missing_terminal_lf() {
        let h = Header::new(1024, 5000).unwrap();
        let mut bytes = h.marshal().unwrap();
        bytes[HEADER_SIZE - 1] = 0;
        assert!(Header::unmarshal(&bytes).is_err());
    }
}
