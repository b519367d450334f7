//! Decode quantized-mesh and heightmap terrain tiles.
//!
//! This crate provides pure synchronous decoding functions for terrain tile
//! payloads. All functions are designed to be called from any threading
//! context - the library user controls parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **User-controlled parallelism**: Client decides where decoding runs
//! - **No partial results**: A malformed payload is an error, never a half-built mesh
//!
//! # Key functions
//!
//! - [`decode_quantized_mesh`]: Parse a quantized-mesh tile and its extensions
//! - [`decode_heightmap`]: Parse a legacy heightmap tile
//! - [`zigzag_decode`]: Decode one zig-zag delta
//! - [`decode_high_water_mark`]: Decode high-water-mark triangle indices
//! - [`oct_decode`]: Decode one oct-encoded normal

mod error;
mod extensions;
mod reader;

pub mod heightmap;
pub mod indices;
pub mod metadata;
pub mod normals;
pub mod quantized;
pub mod zigzag;

pub use error::{DecodeError, DecodeResult};
pub use extensions::ExtensionId;
pub use heightmap::decode_heightmap;
pub use indices::{IndexBuffer, IndexWidth, decode_high_water_mark, encode_high_water_mark};
pub use metadata::{AvailabilityMetadata, TileRange, parse_metadata_extension};
pub use normals::{decode_oct_normals, oct_decode};
pub use quantized::decode_quantized_mesh;
pub use zigzag::{decode_vertex_planes, zigzag_decode, zigzag_encode};

use glam::{DVec3, Vec2, Vec3};

/// Largest quantized coordinate value. `u`, `v` and `height` span `0..=32767`.
pub const QUANTIZED_MAX: u16 = 32767;

/// Heightmap samples encode `value * HEIGHTMAP_SCALE + HEIGHTMAP_OFFSET` metres.
pub const HEIGHTMAP_SCALE: f64 = 1.0 / 5.0;

/// See [`HEIGHTMAP_SCALE`].
pub const HEIGHTMAP_OFFSET: f64 = -1000.0;

/// Which extensions to materialise while decoding a quantized-mesh tile.
///
/// Extensions present in the payload but not enabled here are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub vertex_normals: bool,
    pub water_mask: bool,
    pub metadata: bool,
    /// Byte order of each extension's length field. Layers negotiated with
    /// the legacy `vertexnormals` extension use big-endian lengths.
    pub little_endian_extension_size: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            vertex_normals: false,
            water_mask: false,
            metadata: false,
            little_endian_extension_size: true,
        }
    }
}

/// One quantized vertex, decoded from the delta-coded planes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantizedVertex {
    pub u: u16,
    pub v: u16,
    pub height: u16,
}

impl QuantizedVertex {
    /// Texture-space position in `[0, 1]`, `u` east and `v` north.
    #[must_use]
    pub fn uv(&self) -> Vec2 {
        let max = f32::from(QUANTIZED_MAX);
        Vec2::new(f32::from(self.u) / max, f32::from(self.v) / max)
    }

    /// Height in metres, interpolated between the tile's height bounds.
    #[must_use]
    pub fn height_meters(&self, minimum_height: f32, maximum_height: f32) -> f64 {
        let t = f64::from(self.height) / f64::from(QUANTIZED_MAX);
        let min = f64::from(minimum_height);
        min + t * (f64::from(maximum_height) - min)
    }
}

/// Bounding sphere in earth-centred coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

/// Indices of the vertices on each tile edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeIndices {
    pub west: IndexBuffer,
    pub south: IndexBuffer,
    pub east: IndexBuffer,
    pub north: IndexBuffer,
}

/// A decoded quantized-mesh tile.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedMeshTile {
    /// Tile centre in earth-centred coordinates.
    pub center: DVec3,
    pub minimum_height: f32,
    pub maximum_height: f32,
    pub bounding_sphere: BoundingSphere,
    pub horizon_occlusion_point: DVec3,
    pub vertices: Vec<QuantizedVertex>,
    /// Triangle list, three indices per triangle.
    pub indices: IndexBuffer,
    pub edges: EdgeIndices,
    /// Two oct-encoded bytes per vertex, if normals were requested and sent.
    pub encoded_normals: Option<Vec<u8>>,
    pub water_mask: Option<Vec<u8>>,
    /// Descendant availability, if this tile is an availability carrier.
    pub metadata: Option<AvailabilityMetadata>,
}

impl QuantizedMeshTile {
    /// Decode the oct-encoded normals into unit vectors.
    #[must_use]
    pub fn decoded_normals(&self) -> Option<DecodeResult<Vec<Vec3>>> {
        self.encoded_normals
            .as_deref()
            .map(|encoded| decode_oct_normals(encoded, self.vertices.len()))
    }
}

/// A decoded heightmap tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeightmapTile {
    /// Encoded samples, row-major, north row first.
    pub heights: Vec<u16>,
    pub width: usize,
    pub height: usize,
    /// Which children exist: bit0 SW, bit1 SE, bit2 NW, bit3 NE.
    pub child_mask: u8,
    pub water_mask: Option<Vec<u8>>,
}

impl HeightmapTile {
    #[must_use]
    pub fn height_at(&self, column: usize, row: usize) -> Option<u16> {
        if column >= self.width {
            return None;
        }
        self.heights.get(row * self.width + column).copied()
    }

    /// Sample `index` converted to metres.
    #[must_use]
    pub fn height_meters(&self, index: usize) -> Option<f64> {
        self.heights
            .get(index)
            .map(|&h| f64::from(h) * HEIGHTMAP_SCALE + HEIGHTMAP_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantized_vertex_uv() {
        let v = QuantizedVertex {
            u: QUANTIZED_MAX,
            v: 0,
            height: 0,
        };
        assert_eq!(v.uv(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_quantized_vertex_height() {
        let v = QuantizedVertex {
            u: 0,
            v: 0,
            height: QUANTIZED_MAX,
        };
        assert!((v.height_meters(-100.0, 300.0) - 300.0).abs() < 1e-9);

        let v = QuantizedVertex::default();
        assert!((v.height_meters(-100.0, 300.0) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_heightmap_height_at_bounds() {
        let tile = HeightmapTile {
            heights: vec![1, 2, 3, 4, 5, 6],
            width: 3,
            height: 2,
            child_mask: 0,
            water_mask: None,
        };
        assert_eq!(tile.height_at(2, 0), Some(3));
        assert_eq!(tile.height_at(0, 1), Some(4));
        assert_eq!(tile.height_at(3, 0), None);
        assert_eq!(tile.height_at(0, 2), None);
    }
}
