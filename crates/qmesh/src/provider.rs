//! The terrain provider: bootstrap, tile resolution, fetch and decode.
//!
//! A [`TerrainProvider`] is built from the URL of a tile set. Building it
//! follows the `parentUrl` chain of `layer.json` documents into a
//! [`LayerStack`]. Each tile request then resolves the layer that serves the
//! tile, loading availability carriers of sparse layers on the way, and
//! decodes the payload into [`TerrainData`].

use std::collections::HashSet;
use std::f64::consts::PI;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use qmesh_decode::{AvailabilityMetadata, DecodeResult, decode_heightmap, decode_quantized_mesh};
use reqwest::Url;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::availability::AvailabilityIndex;
use crate::ellipsoid::{Ellipsoid, OrientedBoundingBox};
use crate::error::{Error, Result};
use crate::fetch::{FetchRequest, Fetcher, HttpFetcher};
use crate::layer::{TerrainLayer, directory_url};
use crate::metadata::{LayerMetadata, Projection};
use crate::options::ProviderOptions;
use crate::report::{ErrorReporter, LogReporter, RetryDecision};
use crate::stack::{LayerStack, Probe, Resolution, probe};
use crate::tiling::{MAXIMUM_LEVEL, TilingScheme};
use crate::types::{
    HeightmapTerrainData, QuantizedMeshTerrainData, TerrainData, TileKey, TileResponse, child_mask,
};

/// Name of the metadata document inside a tile set directory.
const LAYER_DOCUMENT: &str = "layer.json";

/// Upper bound on skirt depth, in metres.
const MAXIMUM_SKIRT_HEIGHT: f64 = 1000.0;

/// A carrier load that has to be driven by the caller because no runtime
/// was available to spawn it on.
type CarrierTask = Pin<Box<dyn Future<Output = ()> + Send>>;

type CarrierReceiver = broadcast::Receiver<std::result::Result<(), String>>;

/// Geometric error of a level-zero tile sampled `heightmap_width` times per
/// side, for a tiling scheme with `tiles_x` level-zero columns.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn level_zero_maximum_geometric_error(
    ellipsoid: &Ellipsoid,
    heightmap_width: usize,
    tiles_x: u32,
) -> f64 {
    ellipsoid.maximum_radius() * 2.0 * PI * 0.25 / (heightmap_width as f64 * f64::from(tiles_x))
}

/// Streams terrain tiles from a layered quantized-mesh or heightmap tile set.
///
/// Cloning is cheap; clones share availability and in-flight requests.
///
/// # Example
///
/// ```ignore
/// let provider = TerrainProvider::from_url("https://example.com/terrain/").await?;
/// let cancel = CancellationToken::new();
/// let response = provider.request_tile_geometry(TileKey::new(0, 0, 0), &cancel).await?;
/// ```
#[derive(Clone)]
pub struct TerrainProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    url: Url,
    stack: LayerStack,
    fetcher: Arc<dyn Fetcher>,
    options: ProviderOptions,
    tiling: Arc<dyn TilingScheme>,
    ellipsoid: Ellipsoid,
    /// Union of every layer's availability, if any layer has one.
    availability: Option<RwLock<AvailabilityIndex>>,
    level_zero_error: f64,
    attributions: Vec<String>,
    has_vertex_normals: bool,
    has_water_mask: bool,
    has_metadata: bool,
}

impl std::fmt::Debug for TerrainProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainProvider")
            .field("url", &self.inner.url.as_str())
            .field("layers", &self.inner.stack.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Configures and bootstraps a [`TerrainProvider`].
pub struct ProviderBuilder {
    url: String,
    fetcher: Option<Arc<dyn Fetcher>>,
    reporter: Arc<dyn ErrorReporter>,
    options: ProviderOptions,
}

impl ProviderBuilder {
    /// Fetch through `fetcher` instead of a default [`HttpFetcher`].
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Decide retries of failed metadata fetches with `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    /// Load the metadata chain and build the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metadata`] if a document is malformed or unsupported,
    /// or the fetch error the reporter gave up on.
    pub async fn build(self) -> Result<TerrainProvider> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidData {
            context: "tile set url",
            detail: format!("{}: {e}", self.url),
        })?;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new()));

        let layers = load_layers(&url, fetcher.as_ref(), self.reporter.as_ref()).await?;
        Ok(TerrainProvider::from_layers(url, layers, fetcher, self.options))
    }
}

/// Follow the `parentUrl` chain from `url`, most specific layer first.
async fn load_layers(
    url: &Url,
    fetcher: &dyn Fetcher,
    reporter: &dyn ErrorReporter,
) -> Result<Vec<TerrainLayer>> {
    let mut layers = Vec::new();
    let mut visited = HashSet::new();
    let mut base = directory_url(url.clone());

    loop {
        let document = join(&base, LAYER_DOCUMENT)?;
        if !visited.insert(document.clone()) {
            warn!(url = %document, "parentUrl chain loops back, ignoring");
            break;
        }

        let metadata = fetch_metadata(fetcher, reporter, &document, layers.is_empty()).await?;
        info!(
            url = %document,
            format = ?metadata.format,
            sparse = metadata.is_sparse(),
            "loaded terrain layer"
        );

        let parent = metadata.parent_url.clone();
        let has_availability = metadata.has_availability();
        layers.push(TerrainLayer::new(base.clone(), metadata));

        let Some(parent) = parent else {
            break;
        };
        if !has_availability {
            warn!(
                url = %document,
                parent,
                "parentUrl on a layer without availability, ignoring parent"
            );
            break;
        }
        base = directory_url(join(&base, &parent)?);
    }

    Ok(layers)
}

/// Fetch and validate one metadata document, asking `reporter` after each failure.
///
/// A 404 on the `initial` document means a legacy heightmap tile set.
async fn fetch_metadata(
    fetcher: &dyn Fetcher,
    reporter: &dyn ErrorReporter,
    url: &Url,
    initial: bool,
) -> Result<LayerMetadata> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match fetcher.fetch(&FetchRequest::get(url.clone())).await {
            Ok(bytes) => LayerMetadata::parse(&bytes).map_err(|source| Error::Metadata {
                url: url.to_string(),
                source,
            }),
            Err(e) if initial && e.is_not_found() => {
                info!(%url, "no layer.json, assuming a legacy heightmap tile set");
                return Ok(LayerMetadata::legacy_heightmap());
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(metadata) => return Ok(metadata),
            Err(e) => {
                if reporter.report(&e, attempt) == RetryDecision::GiveUp {
                    return Err(e);
                }
            }
        }
    }
}

fn join(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference).map_err(|e| Error::InvalidData {
        context: "url",
        detail: format!("{reference}: {e}"),
    })
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

impl TerrainProvider {
    /// Start configuring a provider for the tile set at `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder {
            url: url.into(),
            fetcher: None,
            reporter: Arc::new(LogReporter),
            options: ProviderOptions::default(),
        }
    }

    /// Bootstrap a provider over HTTP with default options.
    ///
    /// # Errors
    ///
    /// See [`ProviderBuilder::build`].
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::builder(url).build().await
    }

    fn from_layers(
        url: Url,
        layers: Vec<TerrainLayer>,
        fetcher: Arc<dyn Fetcher>,
        options: ProviderOptions,
    ) -> Self {
        let layers: Vec<Arc<TerrainLayer>> = layers.into_iter().map(Arc::new).collect();
        let tiling = layers.first().map_or_else(
            || Projection::default().tiling_scheme(),
            |layer| Arc::clone(layer.tiling_scheme()),
        );

        let availability = layers.iter().any(|l| l.has_availability()).then(|| {
            let maximum_level = layers
                .iter()
                .filter(|l| l.has_availability())
                .map(|l| l.metadata().maximum_level())
                .max()
                .unwrap_or(MAXIMUM_LEVEL);
            let mut index = AvailabilityIndex::new(Arc::clone(&tiling), maximum_level);
            for layer in &layers {
                for (level, range) in layer.seed_ranges() {
                    index.add_range(*level, range);
                }
            }
            RwLock::new(index)
        });

        let attributions = layers
            .iter()
            .filter_map(|l| l.metadata().attribution.clone())
            .filter(|a| !a.is_empty())
            .collect();
        let has_vertex_normals = layers
            .iter()
            .any(|l| l.metadata().extensions.vertex_normals.is_some());
        let has_water_mask = layers.iter().any(|l| l.metadata().extensions.water_mask);
        let has_metadata = layers.iter().any(|l| l.metadata().extensions.metadata);

        let ellipsoid = Ellipsoid::WGS84;
        let level_zero_error = level_zero_maximum_geometric_error(
            &ellipsoid,
            options.heightmap_width,
            tiling.level_zero_tiles_x(),
        );

        Self {
            inner: Arc::new(ProviderInner {
                url,
                stack: LayerStack::new(layers),
                fetcher,
                options,
                tiling,
                ellipsoid,
                availability,
                level_zero_error,
                attributions,
                has_vertex_normals,
                has_water_mask,
                has_metadata,
            }),
        }
    }

    /// The URL the provider was built from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    #[must_use]
    pub fn layers(&self) -> &LayerStack {
        &self.inner.stack
    }

    #[must_use]
    pub fn options(&self) -> &ProviderOptions {
        &self.inner.options
    }

    /// Tiling scheme of the most specific layer.
    #[must_use]
    pub fn tiling_scheme(&self) -> &Arc<dyn TilingScheme> {
        &self.inner.tiling
    }

    /// Run `f` over the availability known so far across all layers.
    ///
    /// `None` if no layer restricts availability. The index is locked for the
    /// duration of `f` only.
    pub fn with_availability<R>(&self, f: impl FnOnce(&AvailabilityIndex) -> R) -> Option<R> {
        self.inner.availability.as_ref().map(|index| f(&read(index)))
    }

    /// Attribution strings of every layer, most specific first.
    #[must_use]
    pub fn attributions(&self) -> &[String] {
        &self.inner.attributions
    }

    #[must_use]
    pub fn level_maximum_geometric_error(&self, level: u32) -> f64 {
        self.inner.level_maximum_geometric_error(level)
    }

    /// Whether requested tiles include vertex normals.
    #[must_use]
    pub fn has_vertex_normals(&self) -> bool {
        self.inner.has_vertex_normals && self.inner.options.request_vertex_normals
    }

    /// Whether requested tiles include a water mask.
    #[must_use]
    pub fn has_water_mask(&self) -> bool {
        self.inner.has_water_mask && self.inner.options.request_water_mask
    }

    /// Whether requested tiles include availability metadata.
    #[must_use]
    pub fn has_metadata(&self) -> bool {
        self.inner.has_metadata && self.inner.options.request_metadata
    }

    /// Whether tile `key` exists, without fetching anything.
    ///
    /// `None` when the provider has no availability or the answer depends on
    /// an availability carrier that has not been loaded yet.
    #[must_use]
    pub fn tile_data_available(&self, key: TileKey) -> Option<bool> {
        if !self.inner.tiling.contains_tile(key) {
            return Some(false);
        }
        let availability = read(self.inner.availability.as_ref()?);
        if key.level > availability.maximum_level() {
            return Some(false);
        }
        if availability.is_tile_available(key.level, key.x, key.y) {
            return Some(true);
        }
        drop(availability);

        if !self.inner.has_metadata {
            return Some(false);
        }
        let unknown = self
            .inner
            .stack
            .layers()
            .iter()
            .any(|layer| matches!(probe(layer, key), Probe::Unknown { .. }));
        if unknown { None } else { Some(false) }
    }

    /// Load the availability carrier that would settle whether `key` exists.
    ///
    /// Returns `false` if there was nothing to load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TileNotAvailable`] for keys outside the tiling grid and
    /// [`Error::AvailabilityFetch`] if the carrier could not be loaded.
    pub async fn load_tile_data_availability(&self, key: TileKey) -> Result<bool> {
        if !self.inner.tiling.contains_tile(key) {
            return Err(Error::TileNotAvailable(key));
        }
        if self.tile_data_available(key).is_some() {
            return Ok(false);
        }

        let carrier = self
            .inner
            .stack
            .layers()
            .iter()
            .enumerate()
            .find_map(|(index, layer)| match probe(layer, key) {
                Probe::Unknown { carrier } => Some((index, carrier)),
                Probe::Available | Probe::Absent => None,
            });
        let Some((index, carrier)) = carrier else {
            return Ok(false);
        };

        let (receiver, task) = self.inner.start_carrier_load(index, carrier);
        if let Some(task) = task {
            task.await;
        }
        wait_for_carrier(carrier, receiver).await?;
        Ok(true)
    }

    /// Fetch and decode tile `key`.
    ///
    /// Availability carriers are loaded first when a sparse layer might hold
    /// the tile. A canceled request returns [`TileResponse::Canceled`]; carrier
    /// loads it started keep running for other requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TileNotAvailable`] if no layer has the tile or `key`
    /// lies outside the tiling grid, or the fetch or decode error that ended
    /// the request.
    pub async fn request_tile_geometry(
        &self,
        key: TileKey,
        cancel: &CancellationToken,
    ) -> Result<TileResponse> {
        if !self.inner.tiling.contains_tile(key) {
            return Err(Error::TileNotAvailable(key));
        }

        let index = loop {
            if cancel.is_cancelled() {
                return Ok(TileResponse::Canceled);
            }

            match self.inner.stack.resolve(key) {
                Resolution::LayerFound(index) => break index,
                Resolution::NotAvailable => return Err(Error::TileNotAvailable(key)),
                Resolution::Pending(carriers) => {
                    debug!(
                        %key,
                        pending = carriers.len(),
                        "tile availability unknown, loading carriers"
                    );
                    let loads: Vec<_> = carriers
                        .into_iter()
                        .map(|(index, carrier)| {
                            let (receiver, task) = self.inner.start_carrier_load(index, carrier);
                            (carrier, receiver, task)
                        })
                        .collect();

                    for (carrier, receiver, task) in loads {
                        if let Some(task) = task {
                            tokio::select! {
                                () = cancel.cancelled() => return Ok(TileResponse::Canceled),
                                () = task => {}
                            }
                        }
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(TileResponse::Canceled),
                            result = wait_for_carrier(carrier, receiver) => result?,
                        }
                    }

                    // Resolve again on a fresh scheduling turn.
                    tokio::task::yield_now().await;
                }
            }
        };

        let layer = Arc::clone(&self.inner.stack.layers()[index]);
        let request = layer.tile_request(key, &self.inner.options, false)?;
        let bytes = tokio::select! {
            () = cancel.cancelled() => return Ok(TileResponse::Canceled),
            bytes = self.inner.fetcher.fetch(&request) => bytes?,
        };

        let data = self.inner.process_tile(&layer, key, bytes, false).await?;
        Ok(TileResponse::Ready(data))
    }
}

async fn wait_for_carrier(carrier: TileKey, mut receiver: CarrierReceiver) -> Result<()> {
    match receiver.recv().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(Error::AvailabilityFetch { key: carrier, message }),
        Err(e) => Err(Error::AvailabilityFetch {
            key: carrier,
            message: e.to_string(),
        }),
    }
}

/// Removes an in-flight entry and publishes the outcome when dropped, so
/// waiters are released even if the load is abandoned or never polled.
struct InFlightGuard {
    layer: Arc<TerrainLayer>,
    key: TileKey,
    result: Option<std::result::Result<(), String>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let sender = self
            .layer
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        if let Some(sender) = sender {
            let result = self
                .result
                .take()
                .unwrap_or_else(|| Err("availability request was abandoned".to_string()));
            // No receivers left is fine.
            let _ = sender.send(result);
        }
    }
}

impl ProviderInner {
    fn level_maximum_geometric_error(&self, level: u32) -> f64 {
        self.level_zero_error / f64::from(level).exp2()
    }

    /// Start loading carrier `key` of layer `index`, or join the load already running.
    ///
    /// The load is spawned on the current tokio runtime. Without one, the
    /// returned task must be awaited by the caller; dropping it releases the
    /// in-flight entry.
    fn start_carrier_load(
        self: &Arc<Self>,
        index: usize,
        key: TileKey,
    ) -> (CarrierReceiver, Option<CarrierTask>) {
        let layer = Arc::clone(&self.stack.layers()[index]);

        let mut in_flight = layer.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = in_flight.get(&key) {
            debug!(carrier = %key, layer = index, "joining in-flight availability request");
            return (sender.subscribe(), None);
        }
        let (sender, receiver) = broadcast::channel(1);
        in_flight.insert(key, sender);
        drop(in_flight);

        debug!(carrier = %key, layer = index, "loading availability carrier");
        let guard = InFlightGuard {
            layer: Arc::clone(&layer),
            key,
            result: None,
        };
        let inner = Arc::clone(self);
        let task = async move {
            let mut guard = guard;
            let result = inner.load_carrier(&layer, key).await.map_err(|e| {
                warn!(carrier = %key, error = %e, "availability carrier failed");
                e.to_string()
            });
            guard.result = Some(result);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
                (receiver, None)
            }
            Err(_) => (receiver, Some(Box::pin(task))),
        }
    }

    async fn load_carrier(&self, layer: &Arc<TerrainLayer>, key: TileKey) -> Result<()> {
        let request = layer.tile_request(key, &self.options, true)?;
        let bytes = self.fetcher.fetch(&request).await?;
        self.process_tile(layer, key, bytes, true).await?;
        layer.mark_carrier_loaded(key);
        Ok(())
    }

    /// Decode a payload of `layer` and apply any availability it carries.
    async fn process_tile(
        &self,
        layer: &Arc<TerrainLayer>,
        key: TileKey,
        bytes: Vec<u8>,
        force_metadata: bool,
    ) -> Result<TerrainData> {
        let rectangle = layer.tiling_scheme().tile_to_rectangle(key);
        let error = self.level_maximum_geometric_error(key.level);

        if layer.is_heightmap() {
            let width = self.options.heightmap_width;
            let tile = self
            .decode(move || decode_heightmap(&bytes, width, width))
            .await?;
            return Ok(TerrainData::Heightmap(HeightmapTerrainData {
                tile,
                rectangle,
                skirt_height: (error * 4.0).min(MAXIMUM_SKIRT_HEIGHT),
            }));
        }

        let options = layer.decode_options(&self.options, force_metadata);
        let tile = self
            .decode(move || decode_quantized_mesh(&bytes, &options))
            .await?;
        if let Some(metadata) = &tile.metadata {
            self.apply_metadata(layer, key, metadata);
        }

        let child_mask = self.availability.as_ref().map_or(child_mask::ALL, |index| {
            read(index).compute_child_mask(key.level, key.x, key.y)
        });
        let oriented_bounding_box = OrientedBoundingBox::from_rectangle(
            &rectangle,
            f64::from(tile.minimum_height),
            f64::from(tile.maximum_height),
            &self.ellipsoid,
        );

        Ok(TerrainData::QuantizedMesh(QuantizedMeshTerrainData {
            tile,
            rectangle,
            skirt_height: (error * 5.0).min(MAXIMUM_SKIRT_HEIGHT),
            child_mask,
            oriented_bounding_box,
        }))
    }

    /// Run `decode` on the blocking pool if configured and a runtime is present.
    async fn decode<T, F>(&self, decode: F) -> Result<T>
    where
        F: FnOnce() -> DecodeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.options.decode_on_worker {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let decoded = handle
                    .spawn_blocking(decode)
                    .await
                    .map_err(|e| Error::Worker { message: e.to_string() })?;
                return Ok(decoded?);
            }
        }
        Ok(decode()?)
    }

    /// Register the descendant ranges announced by carrier `key` in both the
    /// layer's and the provider's availability.
    fn apply_metadata(&self, layer: &TerrainLayer, key: TileKey, metadata: &AvailabilityMetadata) {
        let tiling = layer.tiling_scheme();
        let mut ranges = Vec::new();
        for (level, range) in metadata.ranges_below(key.level) {
            match layer.scheme().to_internal(tiling.as_ref(), level, range) {
                Some(internal) => ranges.push((level, internal)),
                None => warn!(
                    carrier = %key,
                    level,
                    ?range,
                    "ignoring invalid range in tile metadata"
                ),
            }
        }

        if let Some(index) = &self.availability {
            let mut index = index.write().unwrap_or_else(PoisonError::into_inner);
            for (level, range) in &ranges {
                index.add_range(*level, range);
            }
        }
        for (level, range) in &ranges {
            layer.add_available_range(*level, range);
        }
        layer.mark_carrier_loaded(key);
        debug!(carrier = %key, ranges = ranges.len(), "applied tile availability metadata");
    }
}
