//! Async streaming of layered quantized-mesh terrain tile sets.
//!
//! This crate loads a terrain tile set described by `layer.json` documents,
//! resolves which layer serves each tile, discovers sparse availability on
//! demand and decodes tiles with [`qmesh_decode`].
//!
//! # Design principles
//!
//! - **Pluggable fetching**: All network access goes through a [`Fetcher`]
//! - **Sync decoding**: Payloads are decoded by pure functions, on the blocking pool when available
//! - **Cancellation is not an error**: Canceled requests end in [`TileResponse::Canceled`]
//!
//! # Example
//!
//! ```ignore
//! use qmesh::{TerrainProvider, TileKey};
//! use tokio_util::sync::CancellationToken;
//!
//! // Follow the parentUrl chain of the tile set.
//! let provider = TerrainProvider::from_url("https://example.com/terrain/").await?;
//!
//! // Fetch one tile, loading availability carriers if needed.
//! let cancel = CancellationToken::new();
//! let response = provider.request_tile_geometry(TileKey::new(3, 5, 2), &cancel).await?;
//! ```

pub mod availability;
pub mod ellipsoid;
mod error;
pub mod fetch;
pub mod layer;
pub mod metadata;
mod options;
mod provider;
pub mod quadtree;
pub mod report;
pub mod stack;
pub mod tiling;
pub mod types;

pub use availability::AvailabilityIndex;
pub use ellipsoid::{Ellipsoid, OrientedBoundingBox};
pub use error::{Error, MetadataError, Result};
pub use fetch::{FetchFuture, FetchRequest, Fetcher, HttpFetcher};
pub use layer::TerrainLayer;
pub use metadata::LayerMetadata;
pub use options::{ExtensionTransport, ProviderOptions};
pub use provider::{ProviderBuilder, TerrainProvider, level_zero_maximum_geometric_error};
pub use quadtree::{RectangleQuadtree, RectangleRange};
pub use report::{ErrorReporter, LogReporter, RetryDecision, RetryReporter};
pub use stack::{LayerStack, Resolution};
pub use tiling::{
    Cartographic, GeographicTilingScheme, Rectangle, TileScheme, TilingScheme,
    WebMercatorTilingScheme,
};
pub use types::{TerrainData, TileKey, TileResponse};

// Re-export decode types for convenience.
pub use qmesh_decode::{
    AvailabilityMetadata, DecodeError, DecodeOptions, HeightmapTile, QuantizedMeshTile,
    QuantizedVertex, TileRange,
};
pub use tokio_util::sync::CancellationToken;
