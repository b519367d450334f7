//! Triangle and edge index buffers.

use crate::error::{DecodeError, DecodeResult};
use crate::reader::{read_u16, read_u32};

/// Vertex counts above this need 32-bit indices.
pub const MAX_U16_VERTEX_COUNT: usize = 64 * 1024;

/// Width of each index in a tile's index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    U16,
    U32,
}

impl IndexWidth {
    /// Pick the index width used by a tile with `vertex_count` vertices.
    #[must_use]
    pub fn for_vertex_count(vertex_count: usize) -> Self {
        if vertex_count > MAX_U16_VERTEX_COUNT {
            Self::U32
        } else {
            Self::U16
        }
    }

    /// Size of one index in bytes.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Decoded indices, stored at the width the tile was encoded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBuffer {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Default for IndexBuffer {
    fn default() -> Self {
        Self::U16(Vec::new())
    }
}

impl IndexBuffer {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn width(&self) -> IndexWidth {
        match self {
            Self::U16(_) => IndexWidth::U16,
            Self::U32(_) => IndexWidth::U32,
        }
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            Self::U16(v) => v.get(i).copied().map(u32::from),
            Self::U32(v) => v.get(i).copied(),
        }
    }

    /// Iterate over the indices widened to `u32`.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    #[must_use]
    pub fn to_u32_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// Narrow `u32` values into a buffer of the given width.
    ///
    /// Callers guarantee every value fits; indices into a tile with at most
    /// [`MAX_U16_VERTEX_COUNT`] vertices always do.
    #[allow(clippy::cast_possible_truncation)]
    fn from_u32(values: Vec<u32>, width: IndexWidth) -> Self {
        match width {
            IndexWidth::U16 => Self::U16(values.into_iter().map(|v| v as u16).collect()),
            IndexWidth::U32 => Self::U32(values),
        }
    }
}

/// Read `count` raw index values of the given width.
pub fn read_raw_indices(
    data: &[u8],
    offset: &mut usize,
    count: usize,
    width: IndexWidth,
    context: &'static str,
) -> DecodeResult<Vec<u32>> {
    let available = data.len().saturating_sub(*offset) / width.bytes();
    if count > available {
        return Err(DecodeError::UnexpectedEof { context });
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match width {
            IndexWidth::U16 => u32::from(read_u16(data, offset, context)?),
            IndexWidth::U32 => read_u32(data, offset, context)?,
        };
        values.push(value);
    }
    Ok(values)
}

/// Read a `u32` length prefix followed by that many plain (not delta-coded)
/// indices. Used for the four edge index lists.
pub fn read_index_list(
    data: &[u8],
    offset: &mut usize,
    width: IndexWidth,
    vertex_count: usize,
    context: &'static str,
) -> DecodeResult<IndexBuffer> {
    let count = read_u32(data, offset, context)? as usize;
    let values = read_raw_indices(data, offset, count, width, context)?;
    if let Some(&bad) = values.iter().find(|&&v| v as usize >= vertex_count) {
        return Err(DecodeError::InvalidFormat {
            context,
            detail: format!("index {bad} out of bounds for {vertex_count} vertices"),
        });
    }
    Ok(IndexBuffer::from_u32(values, width))
}

/// Decode high-water-mark coded triangle indices.
///
/// The encoding keeps a running `highest` counter: each code `c` produces
/// index `highest - c`, and a code of zero introduces a new vertex by
/// incrementing `highest` afterwards.
///
/// # Errors
///
/// Returns an error if a code refers to a vertex that has not been introduced.
pub fn decode_high_water_mark(codes: &[u32]) -> DecodeResult<Vec<u32>> {
    let mut indices = Vec::with_capacity(codes.len());
    let mut highest: u32 = 0;

    for &code in codes {
        let index = highest
            .checked_sub(code)
            .ok_or_else(|| DecodeError::InvalidFormat {
                context: "triangle indices",
                detail: format!("code {code} exceeds high-water mark {highest}"),
            })?;
        indices.push(index);

        if code == 0 {
            highest += 1;
        }
    }

    Ok(indices)
}

/// Encode indices with the high-water-mark scheme.
///
/// Returns `None` if the indices do not introduce vertices in ascending
/// order, which the scheme cannot represent.
#[must_use]
pub fn encode_high_water_mark(indices: &[u32]) -> Option<Vec<u32>> {
    let mut codes = Vec::with_capacity(indices.len());
    let mut highest: u32 = 0;

    for &index in indices {
        if index > highest {
            return None;
        }
        codes.push(highest - index);
        if index == highest {
            highest += 1;
        }
    }

    Some(codes)
}

/// Read and decode the main triangle list: a `u32` triangle count followed by
/// `3 * count` high-water-mark codes.
pub(crate) fn read_triangle_indices(
    data: &[u8],
    offset: &mut usize,
    width: IndexWidth,
    vertex_count: usize,
) -> DecodeResult<IndexBuffer> {
    const CONTEXT: &str = "triangle indices";

    let triangle_count = read_u32(data, offset, CONTEXT)? as usize;
    let index_count = triangle_count
        .checked_mul(3)
        .ok_or(DecodeError::UnexpectedEof { context: CONTEXT })?;
    let codes = read_raw_indices(data, offset, index_count, width, CONTEXT)?;
    let indices = decode_high_water_mark(&codes)?;

    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
        return Err(DecodeError::InvalidFormat {
            context: CONTEXT,
            detail: format!("index {bad} out of bounds for {vertex_count} vertices"),
        });
    }

    Ok(IndexBuffer::from_u32(indices, width))
}
