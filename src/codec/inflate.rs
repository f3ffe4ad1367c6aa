//! GZIP and ZLIB decompression with a hard output cap.

use crate::error::{ExtractError, Result};
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::Read;

const SCRATCH_SIZE: usize = 256 << 10;

/// True when `data` starts with the gzip magic `1F 8B`.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B
}

/// True when `data` starts with a valid zlib header: deflate method in the
/// low nibble of CMF and the big-endian header divisible by 31.
pub fn is_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let header = u16::from_be_bytes([data[0], data[1]]);
    data[0] & 0x0F == 0x08 && header % 31 == 0
}

pub fn gunzip(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if !is_gzip(data) {
        return Err(ExtractError::UncompressFailed);
    }
    read_capped(GzDecoder::new(data), max_size)
}

pub fn zlib_inflate(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if !is_zlib(data) {
        return Err(ExtractError::UncompressFailed);
    }
    read_capped(ZlibDecoder::new(data), max_size)
}

fn read_capped<R: Read>(decoder: R, max_size: usize) -> Result<Vec<u8>> {
    let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
    let mut reader = decoder.take(limit);
    let mut scratch = vec![0u8; SCRATCH_SIZE];
    let mut out = Vec::new();

    loop {
        match reader.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => {
                if out.len() + n > max_size {
                    tracing::debug!(max_size, "inflated output exceeds limit");
                    return Err(ExtractError::UncompressFailed);
                }
                out.extend_from_slice(&scratch[..n]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "inflate failed");
                return Err(ExtractError::UncompressFailed);
            }
        }
    }

    Ok(out)
}
