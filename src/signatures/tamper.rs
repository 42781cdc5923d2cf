//! Corrupted variants of signed documents.
//!
//! [`flip_byte`] lands inside a ByteRange span and must break the digest;
//! [`append_trailer`] lands after every span and must be caught by the
//! modification check instead.

use crate::error::{Error, Result};

/// Added (mod 256) to a flipped byte.
pub const FLIP_INCREMENT: u8 = 1;

/// Copy of `data` with the byte at `len / 2` changed.
pub fn flip_byte(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::EmptyDocument);
    }
    flip_byte_at(data, data.len() / 2)
}

/// Copy of `data` with the byte at `index` changed.
pub fn flip_byte_at(data: &[u8], index: usize) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::EmptyDocument);
    }
    if index >= data.len() {
        return Err(Error::MalformedRange(format!(
            "flip position {} outside {} byte document",
            index,
            data.len()
        )));
    }
    let mut out = data.to_vec();
    out[index] = out[index].wrapping_add(FLIP_INCREMENT);
    log::debug!("Flipped byte {} ({:#04x} -> {:#04x})", index, data[index], out[index]);
    Ok(out)
}

/// Copy of `data` with `marker` appended.
pub fn append_trailer(data: &[u8], marker: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::EmptyDocument);
    }
    let mut out = Vec::with_capacity(data.len() + marker.len());
    out.extend_from_slice(data);
    out.extend_from_slice(marker);
    Ok(out)
}
