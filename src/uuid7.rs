//! UUIDv7 helpers: timestamp extraction, NullRow UUID construction, and the
//! version/variant validity checks every row key must satisfy.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Validate that `u` has UUIDv7 shape: version nibble 7, RFC-4122 variant, and
/// is not the nil UUID.
pub fn validate_uuidv7(u: &Uuid) -> Result<()> {
    if u.is_nil() {
        return Err(Error::invalid_input("nil UUID is not a valid UUIDv7 key"));
    }
    let bytes = u.as_bytes();
    if bytes[6] >> 4 != 0x7 {
        return Err(Error::invalid_input(format!(
            "version nibble {:#x} is not 7",
            bytes[6] >> 4
        )));
    }
    if bytes[8] >> 6 != 0b10 {
        return Err(Error::invalid_input(format!(
            "variant bits {:#04b} are not RFC-4122",
            bytes[8] >> 6
        )));
    }
    Ok(())
}

/// Extract the 48-bit millisecond timestamp from the top 6 bytes of a UUIDv7.
///
/// Does not itself validate shape; callers that need a validated key should call
/// [`validate_uuidv7`] first.
pub fn extract_ts_ms(u: &Uuid) -> i64 {
    let bytes = u.as_bytes();
    let mut ts = [0u8; 8];
    ts[2..8].copy_from_slice(&bytes[0..6]);
    i64::from_be_bytes(ts)
}

/// Whether `u` is a NullRow UUID: valid UUIDv7 shape, with every bit outside the
/// timestamp/version/variant fields zero.
pub fn is_nullrow_uuid(u: &Uuid) -> bool {
    if validate_uuidv7(u).is_err() {
        return false;
    }
    let bytes = u.as_bytes();
    bytes[6] == 0x70 && bytes[7] == 0x00 && bytes[8] == 0x80 && bytes[9..16].iter().all(|&b| b == 0)
}

/// Build a NullRow UUID carrying `ts_ms` in its timestamp field, all other
/// "random" bits zeroed.
pub fn make_nullrow_uuid(ts_ms: i64) -> Uuid {
    let mut bytes = [0u8; 16];
    let ts = ts_ms.to_be_bytes();
    bytes[0..6].copy_from_slice(&ts[2..8]);
    bytes[6] = 0x70;
    bytes[8] = 0x80;
    Uuid::from_bytes(bytes)
}
