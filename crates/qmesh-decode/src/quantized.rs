//! Quantized-mesh tile decoding.

use glam::DVec3;

use crate::error::{DecodeError, DecodeResult};
use crate::extensions::read_extensions;
use crate::indices::{IndexWidth, read_index_list, read_triangle_indices};
use crate::reader::{align_up, read_f32, read_f64, read_u16, read_u32};
use crate::zigzag::decode_vertex_planes;
use crate::{BoundingSphere, DecodeOptions, EdgeIndices, QuantizedMeshTile};

/// Size of the fixed header, excluding the vertex count.
pub const HEADER_SIZE: usize = 88;

fn read_dvec3(data: &[u8], offset: &mut usize, context: &'static str) -> DecodeResult<DVec3> {
    Ok(DVec3::new(
        read_f64(data, offset, context)?,
        read_f64(data, offset, context)?,
        read_f64(data, offset, context)?,
    ))
}

/// Decode a quantized-mesh tile.
///
/// # Format
///
/// - Header (88 bytes): centre (3 × f64), min/max height (2 × f32), bounding
///   sphere (4 × f64), horizon occlusion point (3 × f64)
/// - Vertex count `n` (u32), then `3n` zig-zag delta coded u16 values
/// - Padding to the index width, triangle count (u32), `3 × count`
///   high-water-mark coded indices
/// - West, south, east and north edge lists, each a u32 count plus indices
/// - Extensions until the end of the buffer
///
/// # Errors
///
/// Returns an error if any section is truncated or inconsistent. Partial
/// results are never returned.
pub fn decode_quantized_mesh(
    data: &[u8],
    options: &DecodeOptions,
) -> DecodeResult<QuantizedMeshTile> {
    if data.len() < HEADER_SIZE + 4 {
        return Err(DecodeError::BufferTooSmall {
            expected: HEADER_SIZE + 4,
            actual: data.len(),
        });
    }

    let mut offset = 0;

    let center = read_dvec3(data, &mut offset, "header")?;
    let minimum_height = read_f32(data, &mut offset, "header")?;
    let maximum_height = read_f32(data, &mut offset, "header")?;
    let bounding_sphere = BoundingSphere {
        center: read_dvec3(data, &mut offset, "header")?,
        radius: read_f64(data, &mut offset, "header")?,
    };
    let horizon_occlusion_point = read_dvec3(data, &mut offset, "header")?;
    debug_assert_eq!(offset, HEADER_SIZE);

    let vertex_count = read_u32(data, &mut offset, "vertex count")? as usize;
    let raw_len = vertex_count * 3;
    if data.len() - offset < raw_len * 2 {
        return Err(DecodeError::UnexpectedEof { context: "vertices" });
    }
    let mut raw = Vec::with_capacity(raw_len);
    for _ in 0..raw_len {
        raw.push(read_u16(data, &mut offset, "vertices")?);
    }
    let vertices = decode_vertex_planes(&raw)?;

    let width = IndexWidth::for_vertex_count(vertex_count);
    offset = align_up(offset, width.bytes());

    let indices = read_triangle_indices(data, &mut offset, width, vertex_count)?;

    let edges = EdgeIndices {
        west: read_index_list(data, &mut offset, width, vertex_count, "west edge")?,
        south: read_index_list(data, &mut offset, width, vertex_count, "south edge")?,
        east: read_index_list(data, &mut offset, width, vertex_count, "east edge")?,
        north: read_index_list(data, &mut offset, width, vertex_count, "north edge")?,
    };

    let extensions = read_extensions(data, &mut offset, vertex_count, options)?;

    Ok(QuantizedMeshTile {
        center,
        minimum_height,
        maximum_height,
        bounding_sphere,
        horizon_occlusion_point,
        vertices,
        indices,
        edges,
        encoded_normals: extensions.encoded_normals,
        water_mask: extensions.water_mask,
        metadata: extensions.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indices::{IndexBuffer, encode_high_water_mark};
    use crate::metadata::TileRange;
    use crate::zigzag::zigzag_encode;

    /// Builds quantized-mesh payloads for tests.
    struct TileBuilder {
        vertices: Vec<(u16, u16, u16)>,
        triangles: Vec<u32>,
        edges: [Vec<u32>; 4],
        extensions: Vec<(u8, Vec<u8>)>,
    }

    impl TileBuilder {
        fn quad() -> Self {
            // Two triangles covering the unit square.
            Self {
                vertices: vec![(0, 0, 0), (32767, 0, 100), (32767, 32767, 200), (0, 32767, 300)],
                triangles: vec![0, 1, 2, 0, 2, 3],
                edges: [vec![0, 3], vec![0, 1], vec![1, 2], vec![3, 2]],
                extensions: Vec::new(),
            }
        }

        fn extension(mut self, id: u8, payload: Vec<u8>) -> Self {
            self.extensions.push((id, payload));
            self
        }

        #[allow(clippy::cast_possible_truncation)]
        fn build(&self) -> Vec<u8> {
            let mut out = Vec::new();
            for v in [1.0f64, 2.0, 3.0] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&(-10.0f32).to_le_bytes());
            out.extend_from_slice(&500.0f32.to_le_bytes());
            for v in [4.0f64, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0] {
                out.extend_from_slice(&v.to_le_bytes());
            }

            let n = self.vertices.len();
            out.extend_from_slice(&(n as u32).to_le_bytes());
            let planes: [Vec<u16>; 3] = [
                self.vertices.iter().map(|v| v.0).collect(),
                self.vertices.iter().map(|v| v.1).collect(),
                self.vertices.iter().map(|v| v.2).collect(),
            ];
            for plane in &planes {
                let mut prev = 0i32;
                for &value in plane {
                    let code = zigzag_encode(i32::from(value) - prev) as u16;
                    out.extend_from_slice(&code.to_le_bytes());
                    prev = i32::from(value);
                }
            }

            let wide = n > 65_536;
            let push_index = |out: &mut Vec<u8>, value: u32| {
                if wide {
                    out.extend_from_slice(&value.to_le_bytes());
                } else {
                    out.extend_from_slice(&(value as u16).to_le_bytes());
                }
            };

            if wide {
                while out.len() % 4 != 0 {
                    out.push(0);
                }
            }

            out.extend_from_slice(&((self.triangles.len() / 3) as u32).to_le_bytes());
            for code in encode_high_water_mark(&self.triangles).unwrap() {
                push_index(&mut out, code);
            }

            for edge in &self.edges {
                out.extend_from_slice(&(edge.len() as u32).to_le_bytes());
                for &index in edge {
                    push_index(&mut out, index);
                }
            }

            for (id, payload) in &self.extensions {
                out.push(*id);
                out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                out.extend_from_slice(payload);
            }

            out
        }
    }

    fn metadata_payload(json: &str) -> Vec<u8> {
        let mut out = u32::try_from(json.len()).unwrap().to_le_bytes().to_vec();
        out.extend_from_slice(json.as_bytes());
        out
    }

    #[test]
    fn test_decode_header_and_geometry() {
        let data = TileBuilder::quad().build();
        let tile = decode_quantized_mesh(&data, &DecodeOptions::default()).unwrap();

        assert_eq!(tile.center, DVec3::new(1.0, 2.0, 3.0));
        assert!((tile.minimum_height + 10.0).abs() < f32::EPSILON);
        assert!((tile.maximum_height - 500.0).abs() < f32::EPSILON);
        assert_eq!(tile.bounding_sphere.center, DVec3::new(4.0, 5.0, 6.0));
        assert!((tile.bounding_sphere.radius - 7.0).abs() < f64::EPSILON);
        assert_eq!(tile.horizon_occlusion_point, DVec3::new(8.0, 9.0, 10.0));

        assert_eq!(tile.vertices.len(), 4);
        assert_eq!(tile.vertices[2].u, 32767);
        assert_eq!(tile.vertices[3].height, 300);

        assert_eq!(tile.indices, IndexBuffer::U16(vec![0, 1, 2, 0, 2, 3]));
        assert_eq!(tile.edges.west, IndexBuffer::U16(vec![0, 3]));
        assert_eq!(tile.edges.south, IndexBuffer::U16(vec![0, 1]));
        assert_eq!(tile.edges.east, IndexBuffer::U16(vec![1, 2]));
        assert_eq!(tile.edges.north, IndexBuffer::U16(vec![3, 2]));
        assert!(tile.encoded_normals.is_none());
        assert!(tile.water_mask.is_none());
        assert!(tile.metadata.is_none());
    }

    #[test]
    fn test_decode_requested_extensions() {
        let data = TileBuilder::quad()
            .extension(1, vec![128; 8])
            .extension(2, vec![1])
            .extension(
                4,
                metadata_payload(r#"{"available":[[{"startX":0,"startY":0,"endX":1,"endY":1}]]}"#),
            )
            .build();
        let options = DecodeOptions {
            vertex_normals: true,
            water_mask: true,
            metadata: true,
            little_endian_extension_size: true,
        };

        let tile = decode_quantized_mesh(&data, &options).unwrap();
        assert_eq!(tile.encoded_normals.as_deref(), Some(&[128u8; 8][..]));
        assert_eq!(tile.water_mask, Some(vec![1]));
        let metadata = tile.metadata.as_ref().unwrap();
        assert_eq!(metadata.available[0], vec![TileRange::new(0, 0, 1, 1)]);
        assert_eq!(tile.decoded_normals().unwrap().unwrap().len(), 4);
    }

    #[test]
    fn test_decode_skips_unrequested_extensions() {
        let data = TileBuilder::quad()
            .extension(1, vec![128; 8])
            .extension(77, vec![0; 3])
            .build();
        let tile = decode_quantized_mesh(&data, &DecodeOptions::default()).unwrap();
        assert!(tile.encoded_normals.is_none());
    }

    #[test]
    fn test_decode_wide_indices_are_aligned() {
        let n = 65_537usize;
        let mut builder = TileBuilder::quad();
        builder.vertices = (0..n).map(|i| ((i % 32_768) as u16, 0, 0)).collect();
        builder.triangles = vec![0, 1, 2, 2, 1, 3];
        builder.edges = [vec![0], vec![1], vec![65_536], vec![3]];

        let data = builder.build();
        let tile = decode_quantized_mesh(&data, &DecodeOptions::default()).unwrap();
        assert_eq!(tile.indices, IndexBuffer::U32(vec![0, 1, 2, 2, 1, 3]));
        assert_eq!(tile.edges.east, IndexBuffer::U32(vec![65_536]));
    }

    #[test]
    fn test_decode_truncated_header() {
        let data = TileBuilder::quad().build();
        assert!(matches!(
            decode_quantized_mesh(&data[..50], &DecodeOptions::default()),
            Err(DecodeError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_edges() {
        let data = TileBuilder::quad().build();
        // Drop the last index of the north edge.
        let cut = &data[..data.len() - 2];
        assert!(matches!(
            decode_quantized_mesh(cut, &DecodeOptions::default()),
            Err(DecodeError::UnexpectedEof {
                context: "north edge"
            })
        ));
    }

    #[test]
    fn test_decode_truncated_extension() {
        let mut data = TileBuilder::quad().extension(2, vec![0; 32]).build();
        data.truncate(data.len() - 4);
        let options = DecodeOptions {
            water_mask: true,
            ..DecodeOptions::default()
        };
        assert!(decode_quantized_mesh(&data, &options).is_err());
    }

    #[test]
    fn test_decode_vertex_count_overflowing_buffer() {
        let mut data = TileBuilder::quad().build();
        data[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&1_000_000u32.to_le_bytes());
        assert_eq!(
            decode_quantized_mesh(&data, &DecodeOptions::default()),
            Err(DecodeError::UnexpectedEof {
                context: "vertices"
            })
        );
    }
}
