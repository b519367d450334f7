//! Error types for the qmesh crate.

use std::fmt;

use crate::types::TileKey;

/// Result type for qmesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a metadata document (`layer.json`) is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// The `format` key is absent.
    MissingFormat,
    /// The `format` is neither `heightmap-1.0` nor `quantized-mesh-1.*`.
    UnsupportedFormat(String),
    /// The `tiles` key is absent or empty.
    MissingTiles,
    /// The `projection` is neither `EPSG:4326` nor `EPSG:3857`.
    UnsupportedProjection(String),
    /// The `scheme` is neither `tms` nor `slippyMap`.
    UnsupportedScheme(String),
    /// The document is not valid JSON of the expected shape.
    Json(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFormat => write!(f, "the tile format is not specified"),
            Self::UnsupportedFormat(format) => {
                write!(f, "the tile format \"{format}\" is invalid or not supported")
            }
            Self::MissingTiles => write!(f, "no tile URL templates are specified"),
            Self::UnsupportedProjection(projection) => {
                write!(f, "the projection \"{projection}\" is invalid or not supported")
            }
            Self::UnsupportedScheme(scheme) => {
                write!(f, "the scheme \"{scheme}\" is invalid or not supported")
            }
            Self::Json(message) => write!(f, "malformed document: {message}"),
        }
    }
}

impl std::error::Error for MetadataError {}

/// Errors that can occur in qmesh operations.
#[derive(Debug)]
pub enum Error {
    /// HTTP request failed.
    Http {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// HTTP response had a non-success status code.
    HttpStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// A metadata document was malformed or unsupported.
    Metadata {
        /// The document's URL.
        url: String,
        source: MetadataError,
    },
    /// No layer has this tile.
    TileNotAvailable(TileKey),
    /// Fetching an availability carrier tile failed.
    AvailabilityFetch {
        /// The carrier tile that was being fetched.
        key: TileKey,
        message: String,
    },
    /// Tile decoding failed.
    Decode(qmesh_decode::DecodeError),
    /// Invalid data in a request or response.
    InvalidData {
        /// Context for where the error occurred.
        context: &'static str,
        /// Description of what was invalid.
        detail: String,
    },
    /// A background decode task did not complete.
    Worker {
        message: String,
    },
}

impl Error {
    /// Whether the server answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 404, .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http { url, message } => {
                write!(f, "http request to {url} failed: {message}")
            }
            Error::HttpStatus { url, status } => {
                write!(f, "http request to {url} returned status {status}")
            }
            Error::Metadata { url, source } => {
                write!(f, "unsupported terrain metadata at {url}: {source}")
            }
            Error::TileNotAvailable(key) => write!(f, "terrain tile {key} doesn't exist"),
            Error::AvailabilityFetch { key, message } => {
                write!(f, "failed to load availability from tile {key}: {message}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::InvalidData { context, detail } => {
                write!(f, "invalid {context}: {detail}")
            }
            Error::Worker { message } => write!(f, "decode worker failed: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e),
            Error::Metadata { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<qmesh_decode::DecodeError> for Error {
    fn from(e: qmesh_decode::DecodeError) -> Self {
        Error::Decode(e)
    }
}
