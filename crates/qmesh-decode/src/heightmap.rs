//! Heightmap tile decoding.

use crate::HeightmapTile;
use crate::error::{DecodeError, DecodeResult};
use crate::reader::{read_bytes, read_u8, read_u16};

/// Decode a heightmap tile.
///
/// # Format
///
/// - `width * height` little-endian `u16` heights, row-major, north row first
/// - 1 byte child mask
/// - Remaining bytes: optional water mask
///
/// # Errors
///
/// Returns an error if the buffer cannot hold the heights and the child mask.
pub fn decode_heightmap(data: &[u8], width: usize, height: usize) -> DecodeResult<HeightmapTile> {
    let sample_count = width * height;
    let expected = sample_count * 2 + 1;
    if data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }

    let mut offset = 0;
    let mut heights = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        heights.push(read_u16(data, &mut offset, "heights")?);
    }

    let child_mask = read_u8(data, &mut offset, "child mask")?;

    let remaining = data.len() - offset;
    let water_mask = if remaining > 0 {
        Some(read_bytes(data, &mut offset, remaining, "water mask")?.to_vec())
    } else {
        None
    };

    Ok(HeightmapTile {
        heights,
        width,
        height,
        child_mask,
        water_mask,
    })
}
