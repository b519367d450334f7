//! The extension list that trails a quantized-mesh tile.

use crate::DecodeOptions;
use crate::error::{DecodeError, DecodeResult};
use crate::metadata::{AvailabilityMetadata, parse_metadata_extension};
use crate::reader::{read_bytes, read_u8, read_u32_with_order};

/// Identifier byte of a quantized-mesh extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionId {
    /// Two oct-encoded bytes per vertex.
    OctVertexNormals,
    /// A single byte for a uniform tile, otherwise a 256x256 mask.
    WaterMask,
    /// JSON availability for descendant tiles.
    Metadata,
    /// Any id this decoder does not interpret. Skipped by its length.
    Unknown(u8),
}

impl From<u8> for ExtensionId {
    fn from(id: u8) -> Self {
        match id {
            1 => Self::OctVertexNormals,
            2 => Self::WaterMask,
            4 => Self::Metadata,
            other => Self::Unknown(other),
        }
    }
}

/// Extension payloads materialised for a tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Extensions {
    pub encoded_normals: Option<Vec<u8>>,
    pub water_mask: Option<Vec<u8>>,
    pub metadata: Option<AvailabilityMetadata>,
}

/// Read `{id: u8, length: u32, payload}` entries until the end of `data`.
///
/// Only extensions enabled in `options` are kept; the rest are skipped using
/// their declared length.
pub(crate) fn read_extensions(
    data: &[u8],
    offset: &mut usize,
    vertex_count: usize,
    options: &DecodeOptions,
) -> DecodeResult<Extensions> {
    let mut extensions = Extensions::default();

    while *offset < data.len() {
        let id = ExtensionId::from(read_u8(data, offset, "extension header")?);
        let len = read_u32_with_order(
            data,
            offset,
            options.little_endian_extension_size,
            "extension header",
        )? as usize;
        let payload = read_bytes(data, offset, len, "extension payload")?;

        match id {
            ExtensionId::OctVertexNormals if options.vertex_normals => {
                let normals =
                    payload
                        .get(..vertex_count * 2)
                        .ok_or(DecodeError::BufferTooSmall {
                            expected: vertex_count * 2,
                            actual: payload.len(),
                        })?;
                extensions.encoded_normals = Some(normals.to_vec());
            }
            ExtensionId::WaterMask if options.water_mask => {
                extensions.water_mask = Some(payload.to_vec());
            }
            ExtensionId::Metadata if options.metadata => {
                extensions.metadata = Some(parse_metadata_extension(payload)?);
            }
            _ => {}
        }
    }

    Ok(extensions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u8, payload: &[u8], little_endian: bool) -> Vec<u8> {
        let len = u32::try_from(payload.len()).unwrap();
        let mut out = vec![id];
        if little_endian {
            out.extend_from_slice(&len.to_le_bytes());
        } else {
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    fn all_enabled() -> DecodeOptions {
        DecodeOptions {
            vertex_normals: true,
            water_mask: true,
            metadata: true,
            little_endian_extension_size: true,
        }
    }

    #[test]
    fn test_extension_id_mapping() {
        assert_eq!(ExtensionId::from(1), ExtensionId::OctVertexNormals);
        assert_eq!(ExtensionId::from(2), ExtensionId::WaterMask);
        assert_eq!(ExtensionId::from(4), ExtensionId::Metadata);
        assert_eq!(ExtensionId::from(3), ExtensionId::Unknown(3));
    }

    #[test]
    fn test_unknown_extension_is_skipped() {
        let mut data = entry(9, &[0xAA; 7], true);
        data.extend(entry(2, &[1], true));

        let mut offset = 0;
        let ext = read_extensions(&data, &mut offset, 0, &all_enabled()).unwrap();
        assert_eq!(ext.water_mask, Some(vec![1]));
        assert_eq!(offset, data.len());
    }

    #[test]
    fn test_unrequested_extensions_are_not_materialised() {
        let mut data = entry(1, &[128, 128, 0, 255], true);
        data.extend(entry(2, &[0], true));

        let mut offset = 0;
        let ext = read_extensions(&data, &mut offset, 2, &DecodeOptions::default()).unwrap();
        assert_eq!(ext, Extensions::default());
        assert_eq!(offset, data.len());
    }

    #[test]
    fn test_big_endian_extension_length() {
        let data = entry(1, &[128, 128], false);
        let options = DecodeOptions {
            little_endian_extension_size: false,
            ..all_enabled()
        };

        let mut offset = 0;
        let ext = read_extensions(&data, &mut offset, 1, &options).unwrap();
        assert_eq!(ext.encoded_normals, Some(vec![128, 128]));
    }

    #[test]
    fn test_truncated_extension_fails() {
        let mut data = entry(2, &[0; 16], true);
        data.truncate(10);

        let mut offset = 0;
        assert!(matches!(
            read_extensions(&data, &mut offset, 0, &all_enabled()),
            Err(DecodeError::UnexpectedEof {
                context: "extension payload"
            })
        ));
    }

    #[test]
    fn test_short_normals_payload_fails() {
        let data = entry(1, &[1, 2], true);
        let mut offset = 0;
        assert!(matches!(
            read_extensions(&data, &mut offset, 4, &all_enabled()),
            Err(DecodeError::BufferTooSmall { .. })
        ));
    }
}
