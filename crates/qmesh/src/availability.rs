//! Tile-granularity availability over a [`RectangleQuadtree`].

use std::sync::Arc;

use qmesh_decode::TileRange;

use crate::quadtree::{RectangleQuadtree, RectangleRange};
use crate::tiling::{Cartographic, Rectangle, TilingScheme};
use crate::types::{TileKey, child_mask};

/// Records which tiles of a tiling scheme exist.
///
/// Availability only ever grows. Ancestors of an available tile are assumed
/// available by callers but are not enforced here.
#[derive(Debug)]
pub struct AvailabilityIndex {
    maximum_level: u32,
    tree: RectangleQuadtree,
}

impl AvailabilityIndex {
    #[must_use]
    pub fn new(tiling: Arc<dyn TilingScheme>, maximum_level: u32) -> Self {
        Self {
            maximum_level,
            tree: RectangleQuadtree::new(tiling, maximum_level),
        }
    }

    #[must_use]
    pub fn maximum_level(&self) -> u32 {
        self.maximum_level
    }

    #[must_use]
    pub fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        self.tree.tiling_scheme()
    }

    /// Mark tiles `start_x..=end_x` by `start_y..=end_y` at `level` available.
    ///
    /// Rows use the north-first convention. Level-zero ranges also create the
    /// quadtree roots they cover.
    pub fn add_available_range(
        &mut self,
        level: u32,
        start_x: u32,
        start_y: u32,
        end_x: u32,
        end_y: u32,
    ) {
        if level == 0 {
            for y in start_y..=end_y {
                for x in start_x..=end_x {
                    self.tree.ensure_root(x, y);
                }
            }
        }

        let tiling = Arc::clone(self.tree.tiling_scheme());
        let first = tiling.tile_to_rectangle(TileKey::new(level, start_x, start_y));
        let last = tiling.tile_to_rectangle(TileKey::new(level, end_x, end_y));
        let rectangle = Rectangle::new(first.west, last.south, last.east, first.north);

        self.tree.register(RectangleRange::new(level, rectangle));
    }

    /// [`add_available_range`](Self::add_available_range) for a decoded range.
    pub fn add_range(&mut self, level: u32, range: &TileRange) {
        self.add_available_range(level, range.start_x, range.start_y, range.end_x, range.end_y);
    }

    /// The deepest available level at `position`, or `None` outside every root.
    #[must_use]
    pub fn compute_maximum_level_at_position(&self, position: Cartographic) -> Option<u32> {
        self.tree.max_level_at_point(position)
    }

    /// The highest level available over the whole of `rectangle`.
    #[must_use]
    pub fn compute_best_available_level_over_rectangle(&self, rectangle: &Rectangle) -> u32 {
        self.tree.best_level_over_rectangle(rectangle)
    }

    #[must_use]
    pub fn is_tile_available(&self, level: u32, x: u32, y: u32) -> bool {
        let center = self
            .tiling_scheme()
            .tile_to_rectangle(TileKey::new(level, x, y))
            .center();
        self.compute_maximum_level_at_position(center)
            .is_some_and(|max| max >= level)
    }

    /// Which children of a tile exist: bit0 SW, bit1 SE, bit2 NW, bit3 NE.
    ///
    /// Always 0 when the children would reach the maximum level or fall
    /// outside the index range of `u32`.
    #[must_use]
    pub fn compute_child_mask(&self, level: u32, x: u32, y: u32) -> u8 {
        let child_level = level.saturating_add(1);
        if child_level >= self.maximum_level {
            return 0;
        }
        let (Some(cx), Some(cy)) = (x.checked_mul(2), y.checked_mul(2)) else {
            return 0;
        };

        let mut mask = 0;
        if self.is_tile_available(child_level, cx, cy + 1) {
            mask |= child_mask::SOUTH_WEST;
        }
        if self.is_tile_available(child_level, cx + 1, cy + 1) {
            mask |= child_mask::SOUTH_EAST;
        }
        if self.is_tile_available(child_level, cx, cy) {
            mask |= child_mask::NORTH_WEST;
        }
        if self.is_tile_available(child_level, cx + 1, cy) {
            mask |= child_mask::NORTH_EAST;
        }
        mask
    }
}
