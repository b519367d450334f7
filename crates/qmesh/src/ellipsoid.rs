//! Reference ellipsoid and tile bounding volumes.

use glam::{DMat3, DVec3};

use crate::tiling::{Cartographic, Rectangle};

/// A triaxial ellipsoid centred at the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    radii: DVec3,
}

impl Ellipsoid {
    /// The WGS84 ellipsoid, in metres.
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179),
    };

    #[must_use]
    pub fn new(radii: DVec3) -> Self {
        Self { radii }
    }

    #[must_use]
    pub fn radii(&self) -> DVec3 {
        self.radii
    }

    #[must_use]
    pub fn maximum_radius(&self) -> f64 {
        self.radii.max_element()
    }

    /// Unit normal to the surface at a geodetic position.
    #[must_use]
    pub fn geodetic_surface_normal(&self, position: Cartographic) -> DVec3 {
        let cos_latitude = position.latitude.cos();
        DVec3::new(
            cos_latitude * position.longitude.cos(),
            cos_latitude * position.longitude.sin(),
            position.latitude.sin(),
        )
    }

    /// Earth-centred position of a geodetic position at `height` metres.
    #[must_use]
    pub fn cartographic_to_cartesian(&self, position: Cartographic, height: f64) -> DVec3 {
        let normal = self.geodetic_surface_normal(position);
        let k = self.radii * self.radii * normal;
        let gamma = normal.dot(k).sqrt();
        k / gamma + normal * height
    }
}

/// Oriented bounding box for culling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBoundingBox {
    /// Center position in earth-centred coordinates.
    pub center: DVec3,
    /// Half-extents along each local axis.
    pub extents: DVec3,
    /// Columns are the local east, north and up axes.
    pub orientation: DMat3,
}

impl OrientedBoundingBox {
    /// Fit a box around the part of `ellipsoid` under `rectangle`, between
    /// `minimum_height` and `maximum_height`.
    ///
    /// The box is aligned to the east-north-up frame at the rectangle centre.
    #[must_use]
    pub fn from_rectangle(
        rectangle: &Rectangle,
        minimum_height: f64,
        maximum_height: f64,
        ellipsoid: &Ellipsoid,
    ) -> Self {
        const SAMPLES: u32 = 5;

        let center = rectangle.center();
        let origin = ellipsoid.cartographic_to_cartesian(center, 0.0);
        let up = ellipsoid.geodetic_surface_normal(center);
        let east = DVec3::new(-center.longitude.sin(), center.longitude.cos(), 0.0);
        let north = up.cross(east);
        let orientation = DMat3::from_cols(east, north, up);
        let to_local = orientation.transpose();

        let width = rectangle.width();
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for i in 0..SAMPLES {
            let longitude = rectangle.west + width * f64::from(i) / f64::from(SAMPLES - 1);
            for j in 0..SAMPLES {
                let latitude = rectangle.south
                    + rectangle.height() * f64::from(j) / f64::from(SAMPLES - 1);
                let position = Cartographic::new(longitude, latitude);
                for height in [minimum_height, maximum_height] {
                    let local =
                        to_local * (ellipsoid.cartographic_to_cartesian(position, height) - origin);
                    min = min.min(local);
                    max = max.max(local);
                }
            }
        }

        Self {
            center: origin + orientation * ((min + max) * 0.5),
            extents: (max - min) * 0.5,
            orientation,
        }
    }

    /// Whether `point` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, point: DVec3) -> bool {
        let local = self.orientation.transpose() * (point - self.center);
        local.abs().cmple(self.extents + DVec3::splat(1e-6)).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartographic_to_cartesian_axes() {
        let wgs84 = Ellipsoid::WGS84;
        let p = wgs84.cartographic_to_cartesian(Cartographic::new(0.0, 0.0), 0.0);
        assert!((p - DVec3::new(6_378_137.0, 0.0, 0.0)).length() < 1e-6);

        let pole = wgs84.cartographic_to_cartesian(Cartographic::from_degrees(0.0, 90.0), 10.0);
        assert!((pole.z - 6_356_762.314_245_179).abs() < 1e-6);
    }

    #[test]
    fn test_maximum_radius() {
        assert!((Ellipsoid::WGS84.maximum_radius() - 6_378_137.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_obb_encloses_corners() {
        let wgs84 = Ellipsoid::WGS84;
        let rect = Rectangle::from_degrees(10.0, 40.0, 11.0, 41.0);
        let obb = OrientedBoundingBox::from_rectangle(&rect, -50.0, 2000.0, &wgs84);

        for (lon, lat) in [(10.0, 40.0), (11.0, 40.0), (10.0, 41.0), (11.0, 41.0)] {
            for h in [-50.0, 2000.0] {
                let p = wgs84.cartographic_to_cartesian(Cartographic::from_degrees(lon, lat), h);
                assert!(obb.contains(p), "corner {lon},{lat},{h} outside box");
            }
        }

        // Up axis points away from the centre of the earth.
        assert!(obb.orientation.z_axis.dot(obb.center) > 0.0);
        // Roughly 111 km across in each horizontal direction.
        assert!((obb.extents.y * 2.0 - 111_000.0).abs() < 2000.0);
    }
}
