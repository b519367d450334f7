//! Availability documents carried by the metadata extension.

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};
use crate::reader::{read_bytes, read_u32};

/// An inclusive rectangle of tile indices at one level.
///
/// Rows are counted in the tile set's own scheme convention; callers flip
/// them into their internal convention before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRange {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl TileRange {
    #[must_use]
    pub fn new(start_x: u32, start_y: u32, end_x: u32, end_y: u32) -> Self {
        Self {
            start_x,
            start_y,
            end_x,
            end_y,
        }
    }

    /// The range covering a single tile.
    #[must_use]
    pub fn single(x: u32, y: u32) -> Self {
        Self::new(x, y, x, y)
    }
}

/// Descendant availability announced by an availability carrier tile.
///
/// `available[i]` lists the ranges available at `carrier_level + 1 + i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityMetadata {
    #[serde(default)]
    pub available: Vec<Vec<TileRange>>,
}

impl AvailabilityMetadata {
    /// Iterate `(level, range)` pairs for a carrier at `carrier_level`.
    pub fn ranges_below(&self, carrier_level: u32) -> impl Iterator<Item = (u32, &TileRange)> {
        (carrier_level + 1..)
            .zip(&self.available)
            .flat_map(|(level, ranges)| ranges.iter().map(move |range| (level, range)))
    }
}

/// Parse a metadata extension payload: a `u32` string length followed by
/// that many bytes of JSON.
///
/// A zero-length string yields an empty document.
///
/// # Errors
///
/// Returns an error if the payload is truncated or the JSON is malformed.
pub fn parse_metadata_extension(payload: &[u8]) -> DecodeResult<AvailabilityMetadata> {
    const CONTEXT: &str = "metadata extension";

    let mut offset = 0;
    let len = read_u32(payload, &mut offset, CONTEXT)? as usize;
    if len == 0 {
        return Ok(AvailabilityMetadata::default());
    }

    let json = read_bytes(payload, &mut offset, len, CONTEXT)?;
    serde_json::from_slice(json).map_err(|e| DecodeError::InvalidFormat {
        context: CONTEXT,
        detail: e.to_string(),
    })
}
