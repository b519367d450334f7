//! Parsing and validation of `layer.json` metadata documents.

use std::sync::Arc;

use qmesh_decode::TileRange;
use serde::Deserialize;

use crate::error::MetadataError;
use crate::tiling::{
    GeographicTilingScheme, MAXIMUM_LEVEL, TileScheme, TilingScheme, WebMercatorTilingScheme,
};

/// Tile URL template used when a tile set publishes no metadata document.
pub const LEGACY_TILE_TEMPLATE: &str = "{z}/{x}/{y}.terrain?v={version}";

/// A `layer.json` document as published, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerJson {
    pub format: Option<String>,
    pub version: Option<String>,
    pub tiles: Option<Vec<String>>,
    pub projection: Option<String>,
    pub scheme: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    pub available: Option<Vec<Vec<TileRange>>>,
    pub metadata_availability: Option<u32>,
    pub attribution: Option<String>,
    pub parent_url: Option<String>,
    pub maxzoom: Option<u32>,
}

/// Payload format of a layer's tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Heightmap,
    QuantizedMesh,
}

/// Map projection of a layer's tile grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// EPSG:4326.
    #[default]
    Geographic,
    /// EPSG:3857.
    WebMercator,
}

impl Projection {
    #[must_use]
    pub fn tiling_scheme(self) -> Arc<dyn TilingScheme> {
        match self {
            Self::Geographic => Arc::new(GeographicTilingScheme::new()),
            Self::WebMercator => Arc::new(WebMercatorTilingScheme::new()),
        }
    }
}

/// Which vertex normal extension a layer advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalsExtension {
    /// `octvertexnormals`.
    Oct,
    /// `vertexnormals`: same payload, but big-endian extension lengths.
    Legacy,
}

impl NormalsExtension {
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Oct => "octvertexnormals",
            Self::Legacy => "vertexnormals",
        }
    }
}

/// Extensions a layer's server can include in tile payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerExtensions {
    pub vertex_normals: Option<NormalsExtension>,
    pub water_mask: bool,
    pub metadata: bool,
}

impl LayerExtensions {
    fn from_tokens(tokens: &[String]) -> Self {
        let has = |token: &str| tokens.iter().any(|t| t == token);
        let vertex_normals = if has("octvertexnormals") {
            Some(NormalsExtension::Oct)
        } else if has("vertexnormals") {
            Some(NormalsExtension::Legacy)
        } else {
            None
        };
        Self {
            vertex_normals,
            water_mask: has("watermask"),
            metadata: has("metadata"),
        }
    }

    /// Byte order of extension length fields in this layer's payloads.
    #[must_use]
    pub fn little_endian_extension_size(&self) -> bool {
        self.vertex_normals != Some(NormalsExtension::Legacy)
    }
}

/// A validated metadata document.
#[derive(Debug, Clone)]
pub struct LayerMetadata {
    pub format: TileFormat,
    pub version: Option<String>,
    pub tiles: Vec<String>,
    pub projection: Projection,
    pub scheme: TileScheme,
    pub extensions: LayerExtensions,
    /// Ranges per level, in the published row order.
    pub available: Option<Vec<Vec<TileRange>>>,
    /// Interval between availability carrier levels.
    pub metadata_availability: Option<u32>,
    pub attribution: Option<String>,
    pub parent_url: Option<String>,
    pub maxzoom: Option<u32>,
}

impl LayerMetadata {
    /// Parse and validate a `layer.json` document.
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let json: LayerJson =
            serde_json::from_slice(bytes).map_err(|e| MetadataError::Json(e.to_string()))?;
        Self::try_from(json)
    }

    /// The implicit description of a tile set without a metadata document.
    #[must_use]
    pub fn legacy_heightmap() -> Self {
        Self {
            format: TileFormat::Heightmap,
            version: Some("1.0.0".to_string()),
            tiles: vec![LEGACY_TILE_TEMPLATE.to_string()],
            projection: Projection::Geographic,
            scheme: TileScheme::Tms,
            extensions: LayerExtensions {
                water_mask: true,
                ..LayerExtensions::default()
            },
            available: None,
            metadata_availability: None,
            attribution: None,
            parent_url: None,
            maxzoom: None,
        }
    }

    #[must_use]
    pub fn is_heightmap(&self) -> bool {
        self.format == TileFormat::Heightmap
    }

    /// Whether this layer needs carrier tiles fetched to learn availability.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.metadata_availability.is_some()
    }

    /// Whether this layer restricts which tiles exist.
    #[must_use]
    pub fn has_availability(&self) -> bool {
        self.available.is_some() || self.is_sparse()
    }

    /// Maximum level of this layer's availability index.
    ///
    /// Sparse layers use `maxzoom`; others the depth of `available`.
    #[must_use]
    pub fn maximum_level(&self) -> u32 {
        let declared = match (&self.available, self.is_sparse()) {
            (Some(levels), false) => u32::try_from(levels.len()).ok(),
            _ => self.maxzoom,
        };
        declared.map_or(MAXIMUM_LEVEL, |level| level.min(MAXIMUM_LEVEL))
    }
}

impl TryFrom<LayerJson> for LayerMetadata {
    type Error = MetadataError;

    fn try_from(json: LayerJson) -> Result<Self, Self::Error> {
        let format = match json.format.as_deref() {
            None => return Err(MetadataError::MissingFormat),
            Some("heightmap-1.0") => TileFormat::Heightmap,
            Some(f) if f.starts_with("quantized-mesh-1.") => TileFormat::QuantizedMesh,
            Some(f) => return Err(MetadataError::UnsupportedFormat(f.to_string())),
        };

        let tiles = match json.tiles {
            Some(tiles) if !tiles.is_empty() => tiles,
            _ => return Err(MetadataError::MissingTiles),
        };

        let projection = match json.projection.as_deref() {
            None | Some("EPSG:4326") => Projection::Geographic,
            Some("EPSG:3857") => Projection::WebMercator,
            Some(p) => return Err(MetadataError::UnsupportedProjection(p.to_string())),
        };

        let scheme = match json.scheme.as_deref() {
            None => TileScheme::Tms,
            Some(s) => TileScheme::from_name(s)
                .ok_or_else(|| MetadataError::UnsupportedScheme(s.to_string()))?,
        };

        let mut extensions = LayerExtensions::from_tokens(&json.extensions);
        if format == TileFormat::Heightmap {
            extensions.water_mask = true;
        }

        Ok(Self {
            format,
            version: json.version,
            tiles,
            projection,
            scheme,
            extensions,
            available: json.available,
            metadata_availability: json.metadata_availability.filter(|&n| n > 0),
            attribution: json.attribution,
            parent_url: json.parent_url,
            maxzoom: json.maxzoom,
        })
    }
}
