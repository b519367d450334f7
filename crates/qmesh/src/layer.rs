//! One metadata layer of a terrain tile set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use qmesh_decode::{DecodeOptions, TileRange};
use reqwest::Url;
use tokio::sync::broadcast;

use crate::availability::AvailabilityIndex;
use crate::error::{Error, Result};
use crate::fetch::FetchRequest;
use crate::metadata::LayerMetadata;
use crate::options::{ExtensionTransport, ProviderOptions};
use crate::tiling::{TileScheme, TilingScheme};
use crate::types::TileKey;

const ACCEPT_TAIL: &str = "application/octet-stream;q=0.9,*/*;q=0.01";

/// The `Accept` header advertising `extensions`.
#[must_use]
pub fn accept_header(extensions: &[&str]) -> String {
    if extensions.is_empty() {
        format!("application/vnd.quantized-mesh,{ACCEPT_TAIL}")
    } else {
        format!(
            "application/vnd.quantized-mesh;extensions={},{ACCEPT_TAIL}",
            extensions.join("-")
        )
    }
}

/// Ensure `url` names a directory so relative references resolve inside it.
#[must_use]
pub fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Sender side of an in-flight availability carrier request.
pub(crate) type InFlight = broadcast::Sender<std::result::Result<(), String>>;

/// A tile set described by one `layer.json`.
///
/// Availability indices are shared between concurrent requests and only grow.
#[derive(Debug)]
pub struct TerrainLayer {
    url: Url,
    metadata: LayerMetadata,
    tiling: Arc<dyn TilingScheme>,
    /// Declared ranges in north-first rows, as registered at construction.
    seed_ranges: Vec<(u32, TileRange)>,
    availability: Option<RwLock<AvailabilityIndex>>,
    /// Carriers whose metadata has been applied. Sparse layers only.
    availability_tiles_loaded: Option<RwLock<HashSet<TileKey>>>,
    pub(crate) in_flight: Mutex<HashMap<TileKey, InFlight>>,
}

impl TerrainLayer {
    /// Build a layer rooted at directory `url` from its validated metadata.
    #[must_use]
    pub fn new(url: Url, metadata: LayerMetadata) -> Self {
        let tiling = metadata.projection.tiling_scheme();
        let maximum_level = metadata.maximum_level();

        let mut seed_ranges = Vec::new();
        if let Some(levels) = &metadata.available {
            for (level, ranges) in (0u32..).zip(levels) {
                for range in ranges {
                    match metadata.scheme.to_internal(tiling.as_ref(), level, range) {
                        Some(range) => seed_ranges.push((level, range)),
                        None => tracing::warn!(level, ?range, "ignoring invalid available range"),
                    }
                }
            }
        } else if metadata.is_sparse() {
            seed_ranges.push((
                0,
                TileRange::new(
                    0,
                    0,
                    tiling.level_zero_tiles_x() - 1,
                    tiling.level_zero_tiles_y() - 1,
                ),
            ));
        }

        let availability = metadata.has_availability().then(|| {
            let mut index = AvailabilityIndex::new(Arc::clone(&tiling), maximum_level);
            for (level, range) in &seed_ranges {
                index.add_range(*level, range);
            }
            RwLock::new(index)
        });
        let availability_tiles_loaded = metadata.is_sparse().then(|| RwLock::new(HashSet::new()));

        Self {
            url: directory_url(url),
            metadata,
            tiling,
            seed_ranges,
            availability,
            availability_tiles_loaded,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn metadata(&self) -> &LayerMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        &self.tiling
    }

    #[must_use]
    pub fn scheme(&self) -> TileScheme {
        self.metadata.scheme
    }

    #[must_use]
    pub fn is_heightmap(&self) -> bool {
        self.metadata.is_heightmap()
    }

    /// Carrier interval of a sparse layer.
    #[must_use]
    pub fn availability_levels(&self) -> Option<u32> {
        self.metadata.metadata_availability
    }

    #[must_use]
    pub fn has_availability(&self) -> bool {
        self.availability.is_some()
    }

    pub(crate) fn seed_ranges(&self) -> &[(u32, TileRange)] {
        &self.seed_ranges
    }

    fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this layer answers for `key`. Layers without availability answer for every tile.
    #[must_use]
    pub fn claims(&self, key: TileKey) -> bool {
        self.availability
            .as_ref()
            .is_none_or(|index| Self::read(index).is_tile_available(key.level, key.x, key.y))
    }

    /// Whether the layer's availability lists `key`. `false` without availability.
    #[must_use]
    pub fn is_tile_available(&self, key: TileKey) -> bool {
        self.availability
            .as_ref()
            .is_some_and(|index| Self::read(index).is_tile_available(key.level, key.x, key.y))
    }

    /// Whether carrier `key` has already delivered its metadata.
    #[must_use]
    pub fn is_carrier_loaded(&self, key: TileKey) -> bool {
        self.availability_tiles_loaded
            .as_ref()
            .is_some_and(|loaded| Self::read(loaded).contains(&key))
    }

    /// Register a range in north-first rows.
    pub fn add_available_range(&self, level: u32, range: &TileRange) {
        if let Some(index) = &self.availability {
            Self::write(index).add_range(level, range);
        }
    }

    pub fn mark_carrier_loaded(&self, key: TileKey) {
        if let Some(loaded) = &self.availability_tiles_loaded {
            Self::write(loaded).insert(key);
        }
    }

    /// Child mask according to this layer alone.
    #[must_use]
    pub fn compute_child_mask(&self, key: TileKey) -> Option<u8> {
        self.availability
            .as_ref()
            .map(|index| Self::read(index).compute_child_mask(key.level, key.x, key.y))
    }

    /// Extension tokens to request for this layer's tiles.
    ///
    /// A token is sent only if the option asks for it and the layer advertises
    /// it. Heightmap layers always request the water mask, and carrier fetches
    /// (`force_metadata`) always request metadata.
    #[must_use]
    pub fn request_extensions(
        &self,
        options: &ProviderOptions,
        force_metadata: bool,
    ) -> Vec<&'static str> {
        let decode = self.decode_options(options, force_metadata);
        let extensions = &self.metadata.extensions;

        let mut tokens = Vec::new();
        if decode.vertex_normals {
            if let Some(normals) = extensions.vertex_normals {
                tokens.push(normals.token());
            }
        }
        if decode.water_mask {
            tokens.push("watermask");
        }
        if decode.metadata {
            tokens.push("metadata");
        }
        tokens
    }

    /// Which extensions to materialize when decoding this layer's payloads.
    #[must_use]
    pub fn decode_options(&self, options: &ProviderOptions, force_metadata: bool) -> DecodeOptions {
        let extensions = &self.metadata.extensions;
        DecodeOptions {
            vertex_normals: options.request_vertex_normals && extensions.vertex_normals.is_some(),
            water_mask: (options.request_water_mask || self.is_heightmap())
                && extensions.water_mask,
            metadata: (options.request_metadata || force_metadata) && extensions.metadata,
            little_endian_extension_size: extensions.little_endian_extension_size(),
        }
    }

    /// The URL of tile `key`, with rows converted to the layer's scheme.
    ///
    /// Returns [`Error::TileNotAvailable`] for keys outside the tiling grid.
    pub fn tile_url(
        &self,
        key: TileKey,
        extensions: &[&str],
        transport: ExtensionTransport,
    ) -> Result<Url> {
        if !self.tiling.contains_tile(key) {
            return Err(Error::TileNotAvailable(key));
        }
        let y = self
            .metadata
            .scheme
            .flip_y(self.tiling.as_ref(), key.level, key.y)
            .ok_or(Error::TileNotAvailable(key))?;
        let templates = &self.metadata.tiles;
        let slot = (key.x as usize + y as usize + key.level as usize) % templates.len();
        let template = &templates[slot];

        let path = template
            .replace("{z}", &key.level.to_string())
            .replace("{x}", &key.x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{version}", self.metadata.version.as_deref().unwrap_or_default());

        let mut url = self.url.join(&path).map_err(|e| Error::InvalidData {
            context: "tile url",
            detail: format!("{path}: {e}"),
        })?;
        if transport == ExtensionTransport::QueryParameter && !extensions.is_empty() {
            url.query_pairs_mut()
                .append_pair("extensions", &extensions.join("-"));
        }
        Ok(url)
    }

    /// The full request for tile `key`.
    pub fn tile_request(
        &self,
        key: TileKey,
        options: &ProviderOptions,
        force_metadata: bool,
    ) -> Result<FetchRequest> {
        let extensions = self.request_extensions(options, force_metadata);
        let url = self.tile_url(key, &extensions, options.extension_transport)?;
        let accept = match options.extension_transport {
            ExtensionTransport::AcceptHeader => accept_header(&extensions),
            ExtensionTransport::QueryParameter => accept_header(&[]),
        };
        Ok(FetchRequest::get(url).with_header("Accept", accept))
    }
}
