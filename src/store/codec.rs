//! Chunk frame codec.
//!
//! A stored chunk is a small framed payload:
//!
//! ```text
//! [flag: u8][raw_len: u64 le][zstd-compressed raw bytes]
//! ```
//!
//! A chunk whose elements are all zero is written as a flag-only frame
//! (`flag = 1`, `raw_len` = element byte count, no payload), so "is this
//! chunk uniformly zero" is answerable from the first byte without
//! decompression.

use crate::buffer::Buffer;
use crate::dtype::DType;
use crate::errors::{CorruptFrameSnafu, Result};

const FLAG_COMPRESSED: u8 = 0;
const FLAG_ZERO: u8 = 1;
const HEADER_LEN: usize = 9;

const ZSTD_LEVEL: i32 = 3;

pub fn encode_chunk(data: &Buffer) -> Result<Vec<u8>> {
    let raw_len = (data.len() * data.dtype().byte_width()) as u64;
    if data.all_zero() {
        let mut frame = Vec::with_capacity(HEADER_LEN);
        frame.push(FLAG_ZERO);
        frame.extend_from_slice(&raw_len.to_le_bytes());
        return Ok(frame);
    }
    let raw = data.to_le_bytes();
    let compressed = zstd::bulk::compress(&raw, ZSTD_LEVEL)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.push(FLAG_COMPRESSED);
    frame.extend_from_slice(&raw_len.to_le_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

fn header(frame: &[u8]) -> Result<(u8, usize)> {
    if frame.len() < HEADER_LEN {
        return CorruptFrameSnafu {
            reason: format!("frame of {} bytes is shorter than the header", frame.len()),
        }
        .fail();
    }
    let flag = frame[0];
    let raw_len = u64::from_le_bytes(frame[1..HEADER_LEN].try_into().unwrap()) as usize;
    Ok((flag, raw_len))
}

/// Header-only probe: is this frame a uniform-zero chunk?
pub fn frame_is_zero(frame: &[u8]) -> Result<bool> {
    Ok(header(frame)?.0 == FLAG_ZERO)
}

/// Decompress a frame into a buffer of `len` elements.
///
/// The zero-frame case allocates without touching the compressor, so
/// callers counting decompressions must only count the compressed arm.
pub fn decode_chunk(frame: &[u8], dtype: DType, len: usize) -> Result<(Buffer, bool)> {
    let (flag, raw_len) = header(frame)?;
    let expected = len * dtype.byte_width();
    if raw_len != expected {
        return CorruptFrameSnafu {
            reason: format!("frame declares {raw_len} raw bytes, chunk needs {expected}"),
        }
        .fail();
    }
    match flag {
        FLAG_ZERO => Ok((Buffer::zeros(dtype, len), false)),
        FLAG_COMPRESSED => {
            let raw = zstd::bulk::decompress(&frame[HEADER_LEN..], raw_len)?;
            Ok((Buffer::from_le_bytes(dtype, &raw)?, true))
        }
        other => CorruptFrameSnafu {
            reason: format!("unknown frame flag {other}"),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let data = Buffer::F64((0..100).map(|i| i as f64 * 0.25).collect());
        let frame = encode_chunk(&data).unwrap();
        assert!(!frame_is_zero(&frame).unwrap());
        let (back, decompressed) = decode_chunk(&frame, DType::Float64, 100).unwrap();
        assert!(decompressed);
        assert_eq!(back, data);
    }

    #[test]
    fn test_zero_frame_skips_compressor() {
        let data = Buffer::zeros(DType::Int64, 64);
        let frame = encode_chunk(&data).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);
        assert!(frame_is_zero(&frame).unwrap());
        let (back, decompressed) = decode_chunk(&frame, DType::Int64, 64).unwrap();
        assert!(!decompressed);
        assert_eq!(back, data);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let data = Buffer::zeros(DType::Int64, 64);
        let frame = encode_chunk(&data).unwrap();
        assert!(decode_chunk(&frame, DType::Int64, 63).is_err());
    }
}
