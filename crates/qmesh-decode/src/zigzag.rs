//! Zig-zag delta coding of quantized vertex positions.

use crate::QuantizedVertex;
use crate::error::{DecodeError, DecodeResult};

/// Decode a zig-zag encoded value back into a signed delta.
///
/// Small magnitudes of either sign map to small unsigned codes:
/// `0 -> 0`, `1 -> -1`, `2 -> 1`, `3 -> -2`, ...
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

/// Encode a signed delta as an unsigned zig-zag value.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Decode the three parallel delta-coded vertex planes.
///
/// Input format: `3 * n` values arranged as `[u0..un, v0..vn, h0..hn]`. Each
/// plane keeps its own running sum; every raw value is a zig-zag encoded delta
/// from the previous vertex in that plane. Sums wrap at 16 bits, the same as
/// writing them back into the raw `u16` buffer.
///
/// # Errors
///
/// Returns an error if the input length is not divisible by 3.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_vertex_planes(raw: &[u16]) -> DecodeResult<Vec<QuantizedVertex>> {
    if !raw.len().is_multiple_of(3) {
        return Err(DecodeError::InvalidFormat {
            context: "vertices",
            detail: format!("vertex data length {} is not divisible by 3", raw.len()),
        });
    }

    let count = raw.len() / 3;
    let mut vertices = Vec::with_capacity(count);

    let mut u: u16 = 0;
    let mut v: u16 = 0;
    let mut height: u16 = 0;

    for i in 0..count {
        u = u.wrapping_add(zigzag_decode(u32::from(raw[i])) as u16);
        v = v.wrapping_add(zigzag_decode(u32::from(raw[count + i])) as u16);
        height = height.wrapping_add(zigzag_decode(u32::from(raw[count * 2 + i])) as u16);

        vertices.push(QuantizedVertex { u, v, height });
    }

    Ok(vertices)
}
