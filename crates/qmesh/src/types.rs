//! High-level types for terrain tiles.
//!
//! These types carry the decoded payloads from `qmesh_decode` together with
//! the tile placement information a renderer needs.

use std::fmt;

use qmesh_decode::{HeightmapTile, QuantizedMeshTile};

use crate::ellipsoid::OrientedBoundingBox;
use crate::tiling::Rectangle;

/// Address of a tile: `level`, column `x` and row `y` with row 0 at the north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    #[must_use]
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }

    /// The tile one level up containing this one, or `None` at level 0.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.level > 0).then(|| Self::new(self.level - 1, self.x >> 1, self.y >> 1))
    }

    /// The four children in north-west, north-east, south-west, south-east order.
    ///
    /// `None` if the child indices do not fit in `u32`.
    #[must_use]
    pub fn children(&self) -> Option<[Self; 4]> {
        let level = self.level.checked_add(1)?;
        let x = self.x.checked_mul(2)?;
        let y = self.y.checked_mul(2)?;
        Some([
            Self::new(level, x, y),
            Self::new(level, x + 1, y),
            Self::new(level, x, y + 1),
            Self::new(level, x + 1, y + 1),
        ])
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

/// Child mask bits.
pub mod child_mask {
    pub const SOUTH_WEST: u8 = 1;
    pub const SOUTH_EAST: u8 = 2;
    pub const NORTH_WEST: u8 = 4;
    pub const NORTH_EAST: u8 = 8;
    pub const ALL: u8 = 15;
}

/// A decoded heightmap tile placed on the globe.
#[derive(Debug, Clone)]
pub struct HeightmapTerrainData {
    pub tile: HeightmapTile,
    pub rectangle: Rectangle,
    /// Depth of the edge skirts, in metres.
    pub skirt_height: f64,
}

/// A decoded quantized-mesh tile placed on the globe.
#[derive(Debug, Clone)]
pub struct QuantizedMeshTerrainData {
    pub tile: QuantizedMeshTile,
    pub rectangle: Rectangle,
    /// Depth of the edge skirts, in metres.
    pub skirt_height: f64,
    /// Which children exist, in the same bit layout as heightmap tiles.
    pub child_mask: u8,
    pub oriented_bounding_box: OrientedBoundingBox,
}

/// Decoded terrain for one tile.
#[derive(Debug, Clone)]
pub enum TerrainData {
    Heightmap(HeightmapTerrainData),
    QuantizedMesh(QuantizedMeshTerrainData),
}

impl TerrainData {
    #[must_use]
    pub fn rectangle(&self) -> &Rectangle {
        match self {
            Self::Heightmap(data) => &data.rectangle,
            Self::QuantizedMesh(data) => &data.rectangle,
        }
    }

    #[must_use]
    pub fn skirt_height(&self) -> f64 {
        match self {
            Self::Heightmap(data) => data.skirt_height,
            Self::QuantizedMesh(data) => data.skirt_height,
        }
    }

    /// Which children exist: bit0 SW, bit1 SE, bit2 NW, bit3 NE.
    #[must_use]
    pub fn child_mask(&self) -> u8 {
        match self {
            Self::Heightmap(data) => data.tile.child_mask,
            Self::QuantizedMesh(data) => data.child_mask,
        }
    }

    #[must_use]
    pub fn water_mask(&self) -> Option<&[u8]> {
        match self {
            Self::Heightmap(data) => data.tile.water_mask.as_deref(),
            Self::QuantizedMesh(data) => data.tile.water_mask.as_deref(),
        }
    }

    /// Whether `child` of the tile at `parent` exists according to the child mask.
    #[must_use]
    pub fn is_child_available(&self, parent: TileKey, child: TileKey) -> bool {
        let mut bit = 2;
        if u64::from(child.x) != u64::from(parent.x) * 2 {
            bit += 1;
        }
        if u64::from(child.y) != u64::from(parent.y) * 2 {
            bit -= 2;
        }
        self.child_mask() & (1 << bit) != 0
    }
}

/// Outcome of a tile request.
#[derive(Debug, Clone)]
pub enum TileResponse {
    Ready(TerrainData),
    /// The request was canceled before its payload arrived.
    Canceled,
}

impl TileResponse {
    /// The terrain, if the request was not canceled.
    #[must_use]
    pub fn into_data(self) -> Option<TerrainData> {
        match self {
            Self::Ready(data) => Some(data),
            Self::Canceled => None,
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heightmap_with_mask(child_mask: u8) -> TerrainData {
        TerrainData::Heightmap(HeightmapTerrainData {
            tile: HeightmapTile {
                heights: vec![0; 4],
                width: 2,
                height: 2,
                child_mask,
                water_mask: None,
            },
            rectangle: Rectangle::MAX_VALUE,
            skirt_height: 10.0,
        })
    }

    #[test]
    fn test_tile_key_parent() {
        assert_eq!(TileKey::new(3, 5, 6).parent(), Some(TileKey::new(2, 2, 3)));
        assert_eq!(TileKey::new(0, 1, 0).parent(), None);
    }

    #[test]
    fn test_tile_key_children() {
        let children = TileKey::new(1, 1, 0).children().unwrap();
        assert_eq!(children[0], TileKey::new(2, 2, 0));
        assert_eq!(children[3], TileKey::new(2, 3, 1));
        for child in children {
            assert_eq!(child.parent(), Some(TileKey::new(1, 1, 0)));
        }
    }

    #[test]
    fn test_tile_key_children_overflow() {
        assert_eq!(TileKey::new(3, u32::MAX, 0).children(), None);
        assert_eq!(TileKey::new(3, 0, 1 << 31).children(), None);
        assert_eq!(TileKey::new(u32::MAX, 0, 0).children(), None);
    }

    #[test]
    fn test_tile_key_display() {
        assert_eq!(TileKey::new(12, 34, 56).to_string(), "12/34/56");
    }

    #[test]
    fn test_is_child_available() {
        let parent = TileKey::new(1, 1, 0);
        let [nw, ne, sw, se] = parent.children().unwrap();

        let data = heightmap_with_mask(child_mask::NORTH_WEST | child_mask::SOUTH_EAST);
        assert!(data.is_child_available(parent, nw));
        assert!(!data.is_child_available(parent, ne));
        assert!(!data.is_child_available(parent, sw));
        assert!(data.is_child_available(parent, se));
    }

    #[test]
    fn test_tile_response() {
        let data = heightmap_with_mask(child_mask::ALL);
        assert!((data.skirt_height() - 10.0).abs() < f64::EPSILON);
        assert!(TileResponse::Ready(data).into_data().is_some());
        assert!(TileResponse::Canceled.is_canceled());
    }
}
