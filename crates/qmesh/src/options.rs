//! Provider configuration.

/// How requested extensions are advertised to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtensionTransport {
    /// In the `Accept` header: `application/vnd.quantized-mesh;extensions=a-b`.
    #[default]
    AcceptHeader,
    /// As a query parameter: `?extensions=a-b`. Used by managed-resource back ends.
    QueryParameter,
}

/// Options for a [`TerrainProvider`](crate::TerrainProvider).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    pub request_vertex_normals: bool,
    pub request_water_mask: bool,
    pub request_metadata: bool,
    pub extension_transport: ExtensionTransport,
    /// Decode payloads on the runtime's blocking pool when one is available.
    pub decode_on_worker: bool,
    /// Samples per side of heightmap tiles.
    pub heightmap_width: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            request_vertex_normals: false,
            request_water_mask: false,
            request_metadata: true,
            extension_transport: ExtensionTransport::AcceptHeader,
            decode_on_worker: true,
            heightmap_width: 65,
        }
    }
}

impl ProviderOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_vertex_normals(mut self, request: bool) -> Self {
        self.request_vertex_normals = request;
        self
    }

    #[must_use]
    pub fn with_water_mask(mut self, request: bool) -> Self {
        self.request_water_mask = request;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, request: bool) -> Self {
        self.request_metadata = request;
        self
    }

    #[must_use]
    pub fn with_extension_transport(mut self, transport: ExtensionTransport) -> Self {
        self.extension_transport = transport;
        self
    }

    #[must_use]
    pub fn with_decode_on_worker(mut self, enabled: bool) -> Self {
        self.decode_on_worker = enabled;
        self
    }

    #[must_use]
    pub fn with_heightmap_width(mut self, width: usize) -> Self {
        self.heightmap_width = width;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ProviderOptions::default();
        assert!(!options.request_vertex_normals);
        assert!(!options.request_water_mask);
        assert!(options.request_metadata);
        assert_eq!(options.extension_transport, ExtensionTransport::AcceptHeader);
        assert!(options.decode_on_worker);
        assert_eq!(options.heightmap_width, 65);
    }

    #[test]
    fn test_builder() {
        let options = ProviderOptions::new()
            .with_vertex_normals(true)
            .with_water_mask(true)
            .with_metadata(false)
            .with_extension_transport(ExtensionTransport::QueryParameter)
            .with_decode_on_worker(false)
            .with_heightmap_width(33);
        assert!(options.request_vertex_normals);
        assert!(options.request_water_mask);
        assert!(!options.request_metadata);
        assert_eq!(options.extension_transport, ExtensionTransport::QueryParameter);
        assert!(!options.decode_on_worker);
        assert_eq!(options.heightmap_width, 33);
    }
}
