//! Resolution of a tile request against a stack of layers.
//!
//! Layers are ordered most specific first: a tile set followed by the parents
//! named through `parentUrl`. The first layer that claims a tile serves it.
//! Sparse layers may not know yet whether they have a tile; they point at the
//! availability carrier whose metadata would settle the question.

use std::sync::Arc;

use crate::layer::TerrainLayer;
use crate::types::TileKey;

/// The carrier tile whose metadata describes `key` in a layer with carriers
/// every `availability_levels` levels. `None` at level 0.
#[must_use]
pub fn carrier_tile(key: TileKey, availability_levels: u32) -> Option<TileKey> {
    if key.level == 0 || availability_levels == 0 {
        return None;
    }
    let parent_level = if key.level % availability_levels == 0 {
        key.level - availability_levels
    } else {
        key.level / availability_levels * availability_levels
    };
    let shift = key.level - parent_level;
    Some(TileKey::new(parent_level, key.x >> shift, key.y >> shift))
}

/// What one layer knows about a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The layer claims the tile.
    Available,
    /// The layer might have the tile once `carrier` has been loaded.
    Unknown { carrier: TileKey },
    /// The layer does not have the tile, and no unloaded carrier could change that.
    Absent,
}

/// Ask `layer` about `key`, walking up through its carriers if needed.
#[must_use]
pub fn probe(layer: &TerrainLayer, key: TileKey) -> Probe {
    if layer.claims(key) {
        return Probe::Available;
    }
    let Some(levels) = layer.availability_levels() else {
        return Probe::Absent;
    };

    let mut carrier = carrier_tile(key, levels);
    while let Some(tile) = carrier {
        if layer.is_tile_available(tile) && !layer.is_carrier_loaded(tile) {
            return Probe::Unknown { carrier: tile };
        }
        carrier = carrier_tile(tile, levels);
    }
    Probe::Absent
}

/// Outcome of resolving a tile against the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Index of the layer that serves the tile.
    LayerFound(usize),
    /// No layer claims the tile yet; these `(layer, carrier)` pairs must be
    /// loaded before resolving again.
    Pending(Vec<(usize, TileKey)>),
    NotAvailable,
}

/// Ordered layers of a terrain tile set, most specific first.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: Vec<Arc<TerrainLayer>>,
}

impl LayerStack {
    #[must_use]
    pub fn new(layers: Vec<Arc<TerrainLayer>>) -> Self {
        Self { layers }
    }

    #[must_use]
    pub fn layers(&self) -> &[Arc<TerrainLayer>] {
        &self.layers
    }

    #[must_use]
    pub fn layer(&self, index: usize) -> Option<&Arc<TerrainLayer>> {
        self.layers.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Pick the layer that serves `key`.
    ///
    /// A single layer serves every request without consulting availability.
    #[must_use]
    pub fn resolve(&self, key: TileKey) -> Resolution {
        if self.layers.len() == 1 {
            return Resolution::LayerFound(0);
        }

        let mut pending = Vec::new();
        for (index, layer) in self.layers.iter().enumerate() {
            match probe(layer, key) {
                Probe::Available => return Resolution::LayerFound(index),
                Probe::Unknown { carrier } => pending.push((index, carrier)),
                Probe::Absent => {}
            }
        }

        if pending.is_empty() {
            Resolution::NotAvailable
        } else {
            Resolution::Pending(pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::LayerMetadata;
    use qmesh_decode::TileRange;
    use reqwest::Url;

    fn layer(json: &str) -> Arc<TerrainLayer> {
        let metadata = LayerMetadata::parse(json.as_bytes()).unwrap();
        Arc::new(TerrainLayer::new(
            Url::parse("https://example.com/terrain/").unwrap(),
            metadata,
        ))
    }

    fn sparse_layer() -> Arc<TerrainLayer> {
        layer(
            r#"{"format": "quantized-mesh-1.0", "tiles": ["{z}/{x}/{y}.terrain"],
                "scheme": "slippyMap", "extensions": ["metadata"], "metadataAvailability": 4,
                "available": [[{"startX": 0, "startY": 0, "endX": 1, "endY": 0}]]}"#,
        )
    }

    fn shallow_parent() -> Arc<TerrainLayer> {
        layer(
            r#"{"format": "quantized-mesh-1.0", "tiles": ["{z}/{x}/{y}.terrain"],
                "scheme": "slippyMap", "available": [
                    [{"startX": 0, "startY": 0, "endX": 1, "endY": 0}],
                    [{"startX": 0, "startY": 0, "endX": 3, "endY": 1}]
                ]}"#,
        )
    }

    #[test]
    fn test_carrier_tile() {
        assert_eq!(carrier_tile(TileKey::new(0, 1, 0), 4), None);
        assert_eq!(carrier_tile(TileKey::new(3, 5, 2), 4), Some(TileKey::new(0, 0, 0)));
        assert_eq!(carrier_tile(TileKey::new(6, 37, 9), 4), Some(TileKey::new(4, 9, 2)));
        assert_eq!(carrier_tile(TileKey::new(4, 9, 2), 4), Some(TileKey::new(0, 0, 0)));
        assert_eq!(carrier_tile(TileKey::new(8, 100, 50), 4), Some(TileKey::new(4, 6, 3)));
        assert_eq!(carrier_tile(TileKey::new(15, 1024, 1024), 10), Some(TileKey::new(10, 32, 32)));
    }

    #[test]
    fn test_probe_walks_up_to_available_carrier() {
        let layer = sparse_layer();
        let key = TileKey::new(6, 37, 9);

        // Only level 0 is known, so the level-0 carrier is the one to load.
        assert_eq!(
            probe(&layer, key),
            Probe::Unknown {
                carrier: TileKey::new(0, 0, 0)
            }
        );

        layer.mark_carrier_loaded(TileKey::new(0, 0, 0));
        assert_eq!(probe(&layer, key), Probe::Absent);

        // The level-0 carrier announced the level-4 carrier.
        layer.add_available_range(4, &TileRange::single(9, 2));
        assert_eq!(
            probe(&layer, key),
            Probe::Unknown {
                carrier: TileKey::new(4, 9, 2)
            }
        );
    }

    #[test]
    fn test_probe_without_carriers() {
        let parent = shallow_parent();
        assert_eq!(probe(&parent, TileKey::new(1, 0, 0)), Probe::Available);
        assert_eq!(probe(&parent, TileKey::new(2, 0, 0)), Probe::Absent);
    }

    #[test]
    fn test_single_layer_skips_probing() {
        let stack = LayerStack::new(vec![shallow_parent()]);
        assert_eq!(stack.resolve(TileKey::new(9, 0, 0)), Resolution::LayerFound(0));
    }

    #[test]
    fn test_resolve_prefers_most_specific_layer() {
        let child = layer(
            r#"{"format": "quantized-mesh-1.0", "tiles": ["a"], "scheme": "slippyMap", "available": [
                [{"startX": 0, "startY": 0, "endX": 1, "endY": 0}],
                [{"startX": 0, "startY": 0, "endX": 0, "endY": 0}]
            ]}"#,
        );
        let stack = LayerStack::new(vec![child, shallow_parent()]);
        assert_eq!(stack.resolve(TileKey::new(1, 0, 0)), Resolution::LayerFound(0));
        assert_eq!(stack.resolve(TileKey::new(1, 3, 1)), Resolution::LayerFound(1));
        assert_eq!(stack.resolve(TileKey::new(2, 0, 0)), Resolution::NotAvailable);
    }

    #[test]
    fn test_resolve_defers_until_carrier_loaded() {
        let child = sparse_layer();
        let stack = LayerStack::new(vec![Arc::clone(&child), shallow_parent()]);
        let key = TileKey::new(6, 37, 9);

        assert_eq!(
            stack.resolve(key),
            Resolution::Pending(vec![(0, TileKey::new(0, 0, 0))])
        );

        // Loading the level-0 carrier announces the level-4 carrier.
        child.add_available_range(4, &TileRange::single(9, 2));
        child.mark_carrier_loaded(TileKey::new(0, 0, 0));
        assert_eq!(
            stack.resolve(key),
            Resolution::Pending(vec![(0, TileKey::new(4, 9, 2))])
        );

        // Loading the level-4 carrier announces the tile itself.
        child.add_available_range(6, &TileRange::single(37, 9));
        child.mark_carrier_loaded(TileKey::new(4, 9, 2));
        assert_eq!(stack.resolve(key), Resolution::LayerFound(0));

        // A sibling the carrier did not announce is now known to be absent.
        assert_eq!(stack.resolve(TileKey::new(6, 36, 9)), Resolution::NotAvailable);
    }

    #[test]
    fn test_layer_without_availability_answers_everything() {
        let child = shallow_parent();
        let fallback = layer(r#"{"format": "heightmap-1.0", "tiles": ["a"]}"#);
        let stack = LayerStack::new(vec![child, fallback]);
        assert_eq!(stack.resolve(TileKey::new(12, 5, 5)), Resolution::LayerFound(1));
    }
}
