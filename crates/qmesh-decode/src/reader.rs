//! Fixed-width little-endian reads over a byte slice.
//!
//! Every function takes the current offset by mutable reference and advances it
//! past the value it read, in the same manner as a varint reader.

use crate::error::{DecodeError, DecodeResult};

/// Borrow `len` bytes starting at `offset`, advancing the offset.
///
/// # Errors
///
/// Returns an error if fewer than `len` bytes remain.
pub fn read_bytes<'a>(
    data: &'a [u8],
    offset: &mut usize,
    len: usize,
    context: &'static str,
) -> DecodeResult<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(DecodeError::UnexpectedEof { context })?;
    let bytes = data
        .get(*offset..end)
        .ok_or(DecodeError::UnexpectedEof { context })?;
    *offset = end;
    Ok(bytes)
}

fn read_array<const N: usize>(
    data: &[u8],
    offset: &mut usize,
    context: &'static str,
) -> DecodeResult<[u8; N]> {
    let bytes = read_bytes(data, offset, N, context)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn read_u8(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<u8> {
    Ok(read_array::<1>(data, offset, context)?[0])
}

pub fn read_u16(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<u16> {
    read_array(data, offset, context).map(u16::from_le_bytes)
}

/// Read a `u32` in either byte order.
///
/// Only the extension-length field of a quantized-mesh tile is ever read
/// big-endian; everything else in the format is little-endian.
pub fn read_u32_with_order(
    data: &[u8],
    offset: &mut usize,
    little_endian: bool,
    context: &'static str,
) -> DecodeResult<u32> {
    let bytes = read_array(data, offset, context)?;
    Ok(if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

pub fn read_u32(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<u32> {
    read_u32_with_order(data, offset, true, context)
}

pub fn read_f32(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<f32> {
    read_array(data, offset, context).map(f32::from_le_bytes)
}

pub fn read_f64(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<f64> {
    read_array(data, offset, context).map(f64::from_le_bytes)
}

/// Round `offset` up to the next multiple of `alignment`.
#[must_use]
pub fn align_up(offset: usize, alignment: usize) -> usize {
    match offset % alignment {
        0 => offset,
        rem => offset + alignment - rem,
    }
}
