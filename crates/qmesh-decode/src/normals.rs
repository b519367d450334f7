//! Oct-encoded vertex normal decoding.

use glam::Vec3;

use crate::error::{DecodeError, DecodeResult};

/// Decode one oct-encoded normal.
///
/// The two bytes are coordinates on an octahedron unfolded onto the unit
/// square; the lower hemisphere is folded over the diagonals.
#[must_use]
pub fn oct_decode(x: u8, y: u8) -> Vec3 {
    let mut n = Vec3::new(from_snorm(x), from_snorm(y), 0.0);
    n.z = 1.0 - (n.x.abs() + n.y.abs());

    if n.z < 0.0 {
        let old_x = n.x;
        n.x = (1.0 - n.y.abs()) * sign_not_zero(old_x);
        n.y = (1.0 - old_x.abs()) * sign_not_zero(n.y);
    }

    n.normalize()
}

/// Decode a buffer of `2 * vertex_count` oct-encoded bytes.
///
/// # Errors
///
/// Returns an error if the buffer does not hold exactly two bytes per vertex.
pub fn decode_oct_normals(encoded: &[u8], vertex_count: usize) -> DecodeResult<Vec<Vec3>> {
    if encoded.len() != vertex_count * 2 {
        return Err(DecodeError::InvalidFormat {
            context: "vertex normals",
            detail: format!(
                "expected {} bytes for {} vertices, got {}",
                vertex_count * 2,
                vertex_count,
                encoded.len()
            ),
        });
    }

    Ok(encoded
        .chunks_exact(2)
        .map(|pair| oct_decode(pair[0], pair[1]))
        .collect())
}

fn from_snorm(value: u8) -> f32 {
    f32::from(value) / 255.0 * 2.0 - 1.0
}

fn sign_not_zero(value: f32) -> f32 {
    if value < 0.0 { -1.0 } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-2, "{a:?} != {b:?}");
    }

    #[test]
    fn test_oct_decode_up() {
        // The centre of the square is +Z.
        assert_close(oct_decode(128, 128), Vec3::Z);
    }

    #[test]
    fn test_oct_decode_axes() {
        assert_close(oct_decode(255, 128), Vec3::X);
        assert_close(oct_decode(0, 128), Vec3::NEG_X);
        assert_close(oct_decode(128, 255), Vec3::Y);
    }

    #[test]
    fn test_oct_decode_lower_hemisphere() {
        // Corners fold to -Z.
        assert_close(oct_decode(0, 0), Vec3::NEG_Z);
        assert_close(oct_decode(255, 255), Vec3::NEG_Z);
    }

    #[test]
    fn test_oct_decode_is_unit_length() {
        for x in (0..=255u8).step_by(17) {
            for y in (0..=255u8).step_by(17) {
                assert!((oct_decode(x, y).length() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_decode_oct_normals_length_mismatch() {
        assert!(matches!(
            decode_oct_normals(&[1, 2, 3], 2),
            Err(DecodeError::InvalidFormat { .. })
        ));
        assert_eq!(decode_oct_normals(&[128, 128], 1).unwrap().len(), 1);
    }
}
