//! Lazy quadtree of level-tagged rectangles.
//!
//! Nodes follow the tile grid of a [`TilingScheme`]: a node at `(level, x, y)`
//! covers exactly that tile's rectangle and its four children are the tiles at
//! `level + 1`. Children are created only when a range is pushed into them.
//! Nodes live in an arena and refer to each other by index.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;

use crate::tiling::{Cartographic, Rectangle, TilingScheme, normalize_longitude};
use crate::types::TileKey;

/// A geographic rectangle known to be available down to `level`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectangleRange {
    pub level: u32,
    pub rectangle: Rectangle,
}

impl RectangleRange {
    #[must_use]
    pub fn new(level: u32, rectangle: Rectangle) -> Self {
        Self { level, rectangle }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

/// Child slot order.
const NW: usize = 0;
const NE: usize = 1;
const SW: usize = 2;
const SE: usize = 3;

#[derive(Debug)]
struct Node {
    key: TileKey,
    extent: Rectangle,
    parent: Option<NodeId>,
    /// Sorted ascending by level.
    ranges: Vec<RectangleRange>,
    children: [Option<NodeId>; 4],
}

/// Spatial index answering "how deep is data available here?".
#[derive(Debug)]
pub struct RectangleQuadtree {
    tiling: Arc<dyn TilingScheme>,
    max_depth: u32,
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl RectangleQuadtree {
    /// Create an empty tree. Ranges are never pushed below `max_depth`.
    #[must_use]
    pub fn new(tiling: Arc<dyn TilingScheme>, max_depth: u32) -> Self {
        Self {
            tiling,
            max_depth,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    #[must_use]
    pub fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        &self.tiling
    }

    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Number of materialized nodes, roots included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn alloc(&mut self, key: TileKey, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            key,
            extent: self.tiling.tile_to_rectangle(key),
            parent,
            ranges: Vec::new(),
            children: [None; 4],
        });
        id
    }

    /// Create the root node for level-zero tile `(x, y)` if it does not exist.
    ///
    /// Returns `true` if a node was created.
    pub fn ensure_root(&mut self, x: u32, y: u32) -> bool {
        let key = TileKey::new(0, x, y);
        if self.roots.iter().any(|id| self.nodes[id.0].key == key) {
            return false;
        }
        let id = self.alloc(key, None);
        self.roots.push(id);
        true
    }

    /// Store `range` in every root it overlaps, each time at the deepest node
    /// that fully contains it. Longitudes are wrapped into `[-π, π]` first.
    pub fn register(&mut self, range: RectangleRange) {
        let mut range = range;
        range.rectangle.west = normalize_longitude(range.rectangle.west);
        range.rectangle.east = normalize_longitude(range.rectangle.east);
        for index in 0..self.roots.len() {
            let root = self.roots[index];
            if self.nodes[root.0].extent.overlaps(&range.rectangle) {
                self.put(root, range);
            }
        }
    }

    fn put(&mut self, root: NodeId, range: RectangleRange) {
        let mut node = root;
        while self.nodes[node.0].key.level < self.max_depth {
            let Some(children) = self.nodes[node.0].key.children() else {
                break;
            };
            let slot = (0..4).find(|&slot| {
                self.tiling
                    .tile_to_rectangle(children[slot])
                    .contains_rectangle(&range.rectangle)
            });
            let Some(slot) = slot else { break };
            node = match self.nodes[node.0].children[slot] {
                Some(child) => child,
                None => {
                    let child = self.alloc(children[slot], Some(node));
                    self.nodes[node.0].children[slot] = Some(child);
                    child
                }
            };
        }

        let ranges = &mut self.nodes[node.0].ranges;
        let index = ranges.partition_point(|r| r.level <= range.level);
        ranges.insert(index, range);
    }

    /// The deepest level available at `position`.
    ///
    /// Returns `None` when no root contains the position, and `Some(0)` when a
    /// root does but no stored range covers it.
    #[must_use]
    pub fn max_level_at_point(&self, position: Cartographic) -> Option<u32> {
        let position =
            Cartographic::new(normalize_longitude(position.longitude), position.latitude);
        let root = self
            .roots
            .iter()
            .copied()
            .find(|id| self.nodes[id.0].extent.contains(position))?;
        Some(self.max_level_from(None, root, position))
    }

    fn max_level_from(&self, stop: Option<NodeId>, start: NodeId, position: Cartographic) -> u32 {
        let mut max_level = 0;
        let mut node = start;

        loop {
            let matching: Vec<NodeId> = self.nodes[node.0]
                .children
                .iter()
                .flatten()
                .copied()
                .filter(|child| self.nodes[child.0].extent.contains(position))
                .collect();

            match matching.as_slice() {
                [] => break,
                [only] => node = *only,
                // On a shared edge or corner: every matching subtree is searched.
                several => {
                    for &child in several {
                        max_level = max_level.max(self.max_level_from(Some(node), child, position));
                    }
                    break;
                }
            }
        }

        let mut current = Some(node);
        while current != stop {
            let Some(id) = current else { break };
            let n = &self.nodes[id.0];
            for range in n.ranges.iter().rev() {
                if range.level <= max_level {
                    break;
                }
                if range.rectangle.contains(position) {
                    max_level = range.level;
                }
            }
            current = n.parent;
        }

        max_level
    }

    /// The highest level at which data is available over all of `rectangle`.
    ///
    /// A level only counts once its ranges cover the rectangle completely.
    /// Returns 0 if no level does.
    #[must_use]
    pub fn best_level_over_rectangle(&self, rectangle: &Rectangle) -> u32 {
        let to_cover = if rectangle.east < rectangle.west {
            vec![
                Rectangle::new(-PI, rectangle.south, rectangle.east, rectangle.north),
                Rectangle::new(rectangle.west, rectangle.south, PI, rectangle.north),
            ]
        } else {
            vec![*rectangle]
        };

        let mut remaining: BTreeMap<u32, Vec<Rectangle>> = BTreeMap::new();
        for &root in &self.roots {
            self.update_coverage(&mut remaining, root, &to_cover);
        }

        remaining
            .iter()
            .rev()
            .find(|(_, uncovered)| uncovered.is_empty())
            .map_or(0, |(&level, _)| level)
    }

    fn update_coverage(
        &self,
        remaining: &mut BTreeMap<u32, Vec<Rectangle>>,
        id: NodeId,
        to_cover: &[Rectangle],
    ) {
        let node = &self.nodes[id.0];
        if !to_cover.iter().any(|r| node.extent.overlaps(r)) {
            return;
        }

        for range in &node.ranges {
            let uncovered = remaining
                .entry(range.level)
                .or_insert_with(|| to_cover.to_vec());
            *uncovered = subtract_rectangle(uncovered, &range.rectangle);
        }

        for slot in [NW, NE, SW, SE] {
            if let Some(child) = node.children[slot] {
                self.update_coverage(remaining, child, to_cover);
            }
        }
    }
}

/// Remove `hole` from each rectangle in `rectangles`, splitting the remainder
/// into up to four pieces.
fn subtract_rectangle(rectangles: &[Rectangle], hole: &Rectangle) -> Vec<Rectangle> {
    let mut result = Vec::with_capacity(rectangles.len());
    for r in rectangles {
        if !r.overlaps(hole) {
            result.push(*r);
            continue;
        }
        if r.west < hole.west {
            result.push(Rectangle::new(r.west, r.south, hole.west, r.north));
        }
        if r.east > hole.east {
            result.push(Rectangle::new(hole.east, r.south, r.east, r.north));
        }
        let west = hole.west.max(r.west);
        let east = hole.east.min(r.east);
        if r.south < hole.south {
            result.push(Rectangle::new(west, r.south, east, hole.south));
        }
        if r.north > hole.north {
            result.push(Rectangle::new(west, hole.north, east, r.north));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::GeographicTilingScheme;

    fn tree(max_depth: u32) -> RectangleQuadtree {
        let mut tree = RectangleQuadtree::new(Arc::new(GeographicTilingScheme::new()), max_depth);
        tree.ensure_root(0, 0);
        tree.ensure_root(1, 0);
        tree
    }

    /// Degrees to radians, exact for multiples of 45 so ranges line up with tile edges.
    fn deg(west: f64, south: f64, east: f64, north: f64) -> Rectangle {
        let r = |d: f64| d / 180.0 * PI;
        Rectangle::new(r(west), r(south), r(east), r(north))
    }

    #[test]
    fn test_ensure_root_is_idempotent() {
        let mut tree = tree(10);
        assert!(!tree.ensure_root(0, 0));
        assert_eq!(tree.root_count(), 2);
    }

    #[test]
    fn test_range_is_stored_at_deepest_containing_node() {
        let mut tree = tree(10);
        // Exactly the level-2 tile (2, 1, 0) in geographic tiling: 0..45 east, 45..90 north.
        tree.register(RectangleRange::new(5, deg(0.0, 45.0, 45.0, 90.0)));
        // Root, level-1 node, level-2 node.
        assert_eq!(tree.node_count(), 2 + 2);
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(20.0, 60.0)),
            Some(5)
        );
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(-20.0, 60.0)),
            Some(0)
        );
    }

    #[test]
    fn test_max_depth_limits_descent() {
        let mut tree = tree(0);
        tree.register(RectangleRange::new(5, deg(0.0, 45.0, 45.0, 90.0)));
        assert_eq!(tree.node_count(), 2);
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(20.0, 60.0)),
            Some(5)
        );
    }

    #[test]
    fn test_point_outside_roots() {
        let mut tree = RectangleQuadtree::new(Arc::new(GeographicTilingScheme::new()), 4);
        tree.ensure_root(0, 0);
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(90.0, 0.0)),
            None
        );
    }

    #[test]
    fn test_higher_level_wins() {
        let mut tree = tree(10);
        tree.register(RectangleRange::new(3, deg(0.0, 0.0, 90.0, 90.0)));
        tree.register(RectangleRange::new(7, deg(10.0, 10.0, 20.0, 20.0)));
        tree.register(RectangleRange::new(2, deg(0.0, 0.0, 90.0, 90.0)));

        let inner = Cartographic::from_degrees(15.0, 15.0);
        let outer = Cartographic::from_degrees(50.0, 50.0);
        assert_eq!(tree.max_level_at_point(inner), Some(7));
        assert_eq!(tree.max_level_at_point(outer), Some(3));
    }

    #[test]
    fn test_point_on_shared_edge_searches_all_children() {
        let mut tree = tree(10);
        // Level-1 tiles of the eastern root: north-west and north-east quadrants.
        tree.register(RectangleRange::new(4, deg(0.0, 0.0, 90.0, 90.0)));
        tree.register(RectangleRange::new(9, deg(90.0, 0.0, 180.0, 90.0)));

        let edge = Cartographic::new(PI / 2.0, PI / 4.0);
        assert_eq!(tree.max_level_at_point(edge), Some(9));
    }

    #[test]
    fn test_longitudes_are_wrapped() {
        let mut tree = tree(10);
        // -170..-100 degrees east, given one turn east.
        tree.register(RectangleRange::new(6, deg(190.0, 0.0, 260.0, 90.0)));
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(-150.0, 30.0)),
            Some(6)
        );
        // 3.5 rad lies just past the anti-meridian.
        assert_eq!(tree.max_level_at_point(Cartographic::new(3.5, 0.5)), Some(6));
        assert_eq!(tree.max_level_at_point(Cartographic::new(3.5, -0.5)), Some(0));
    }

    #[test]
    fn test_range_spanning_roots_is_stored_in_each() {
        let mut tree = tree(10);
        tree.register(RectangleRange::new(2, deg(-10.0, -10.0, 10.0, 10.0)));
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(-5.0, 0.0)),
            Some(2)
        );
        assert_eq!(
            tree.max_level_at_point(Cartographic::from_degrees(5.0, 0.0)),
            Some(2)
        );
    }

    #[test]
    fn test_best_level_requires_full_coverage() {
        let mut tree = tree(10);
        // Two adjoining level-1 ranges jointly cover the query.
        tree.register(RectangleRange::new(1, deg(0.0, 0.0, 90.0, 90.0)));
        tree.register(RectangleRange::new(1, deg(90.0, 0.0, 180.0, 90.0)));
        // A level-2 range covering only part of it.
        tree.register(RectangleRange::new(2, deg(0.0, 0.0, 45.0, 45.0)));

        let query = deg(30.0, 10.0, 120.0, 60.0);
        assert_eq!(tree.best_level_over_rectangle(&query), 1);

        // Inside the level-2 range alone, level 2 is available everywhere.
        assert_eq!(tree.best_level_over_rectangle(&deg(5.0, 5.0, 40.0, 40.0)), 2);
    }

    #[test]
    fn test_best_level_across_antimeridian() {
        let mut tree = tree(10);
        tree.register(RectangleRange::new(3, deg(170.0, -10.0, 180.0, 10.0)));
        tree.register(RectangleRange::new(3, deg(-180.0, -10.0, -170.0, 10.0)));

        let query = deg(175.0, -5.0, -175.0, 5.0);
        assert_eq!(tree.best_level_over_rectangle(&query), 3);

        tree.register(RectangleRange::new(4, deg(170.0, -10.0, 180.0, 10.0)));
        assert_eq!(tree.best_level_over_rectangle(&query), 3);
    }

    #[test]
    fn test_best_level_defaults_to_zero() {
        let tree = tree(10);
        assert_eq!(tree.best_level_over_rectangle(&deg(0.0, 0.0, 1.0, 1.0)), 0);
    }

    #[test]
    fn test_subtract_rectangle_pieces() {
        let outer = deg(0.0, 0.0, 10.0, 10.0);
        let hole = deg(2.0, 2.0, 8.0, 8.0);
        let pieces = subtract_rectangle(&[outer], &hole);
        assert_eq!(pieces.len(), 4);
        let area: f64 = pieces.iter().map(|r| r.width() * r.height()).sum();
        let expected = outer.width() * outer.height() - hole.width() * hole.height();
        assert!((area - expected).abs() < 1e-12);

        assert!(subtract_rectangle(&[hole], &outer).is_empty());
    }
}
