//! Tiling schemes: conversion between tile indices and geographic rectangles.
//!
//! Tiles are addressed internally with row 0 at the north edge. Tile sets
//! published in the TMS convention (row 0 at the south edge) are translated by
//! [`TileScheme`] at the request boundary only.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};
use std::fmt;

use qmesh_decode::TileRange;

use crate::types::TileKey;

/// Deepest level any index or request is built for.
pub const MAXIMUM_LEVEL: u32 = 30;

/// Wrap a longitude into `[-π, π]`.
#[must_use]
pub fn normalize_longitude(longitude: f64) -> f64 {
    if (-PI..=PI).contains(&longitude) {
        return longitude;
    }
    let wrapped = (longitude + PI).rem_euclid(TAU) - PI;
    // Keep +π as +π rather than folding it to -π.
    if wrapped == -PI && longitude > 0.0 {
        PI
    } else {
        wrapped
    }
}

/// A position on the ellipsoid surface, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
}

impl Cartographic {
    #[must_use]
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    #[must_use]
    pub fn from_degrees(longitude: f64, latitude: f64) -> Self {
        Self::new(longitude.to_radians(), latitude.to_radians())
    }
}

/// A geographic rectangle, in radians.
///
/// `east < west` denotes a rectangle crossing the anti-meridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    /// The whole globe.
    pub const MAX_VALUE: Rectangle = Rectangle {
        west: -PI,
        south: -FRAC_PI_2,
        east: PI,
        north: FRAC_PI_2,
    };

    #[must_use]
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    #[must_use]
    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(
            west.to_radians(),
            south.to_radians(),
            east.to_radians(),
            north.to_radians(),
        )
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        let east = if self.east < self.west {
            self.east + TAU
        } else {
            self.east
        };
        east - self.west
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    #[must_use]
    pub fn center(&self) -> Cartographic {
        let east = if self.east < self.west {
            self.east + TAU
        } else {
            self.east
        };
        Cartographic::new(
            normalize_longitude((self.west + east) * 0.5),
            (self.south + self.north) * 0.5,
        )
    }

    /// Edge-inclusive containment test. Does not handle anti-meridian wrap.
    #[must_use]
    pub fn contains(&self, position: Cartographic) -> bool {
        position.longitude >= self.west
            && position.longitude <= self.east
            && position.latitude >= self.south
            && position.latitude <= self.north
    }

    /// Whether the two rectangles share a region of non-zero area.
    #[must_use]
    pub fn overlaps(&self, other: &Rectangle) -> bool {
        let west = self.west.max(other.west);
        let south = self.south.max(other.south);
        let east = self.east.min(other.east);
        let north = self.north.min(other.north);
        south < north && west < east
    }

    /// Whether `other` lies entirely inside this rectangle.
    #[must_use]
    pub fn contains_rectangle(&self, other: &Rectangle) -> bool {
        other.west >= self.west
            && other.east <= self.east
            && other.south >= self.south
            && other.north <= self.north
    }
}

/// Conversion between tile indices and geographic rectangles.
pub trait TilingScheme: fmt::Debug + Send + Sync {
    /// The rectangle covered by all tiles.
    fn rectangle(&self) -> Rectangle;

    fn level_zero_tiles_x(&self) -> u32;

    fn level_zero_tiles_y(&self) -> u32;

    fn number_of_x_tiles_at_level(&self, level: u32) -> u32 {
        self.level_zero_tiles_x() << level
    }

    fn number_of_y_tiles_at_level(&self, level: u32) -> u32 {
        self.level_zero_tiles_y() << level
    }

    /// Whether `key` addresses a tile of this scheme.
    fn contains_tile(&self, key: TileKey) -> bool {
        key.level <= MAXIMUM_LEVEL
            && key.x < self.number_of_x_tiles_at_level(key.level)
            && key.y < self.number_of_y_tiles_at_level(key.level)
    }

    /// The geographic rectangle of a tile.
    fn tile_to_rectangle(&self, key: TileKey) -> Rectangle;

    /// The tile at `level` containing `position`, if it lies in the scheme.
    fn position_to_tile(&self, position: Cartographic, level: u32) -> Option<TileKey>;
}

/// Equirectangular tiling (EPSG:4326) with two level-zero tiles.
#[derive(Debug, Clone, Copy)]
pub struct GeographicTilingScheme {
    rectangle: Rectangle,
    tiles_x: u32,
    tiles_y: u32,
}

impl Default for GeographicTilingScheme {
    fn default() -> Self {
        Self {
            rectangle: Rectangle::MAX_VALUE,
            tiles_x: 2,
            tiles_y: 1,
        }
    }
}

impl GeographicTilingScheme {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TilingScheme for GeographicTilingScheme {
    fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    fn level_zero_tiles_x(&self) -> u32 {
        self.tiles_x
    }

    fn level_zero_tiles_y(&self) -> u32 {
        self.tiles_y
    }

    fn tile_to_rectangle(&self, key: TileKey) -> Rectangle {
        let tile_width =
            self.rectangle.width() / f64::from(self.number_of_x_tiles_at_level(key.level));
        let tile_height =
            self.rectangle.height() / f64::from(self.number_of_y_tiles_at_level(key.level));

        let west = f64::from(key.x) * tile_width + self.rectangle.west;
        let north = self.rectangle.north - f64::from(key.y) * tile_height;
        Rectangle::new(west, north - tile_height, west + tile_width, north)
    }

    fn position_to_tile(&self, position: Cartographic, level: u32) -> Option<TileKey> {
        if !self.rectangle.contains(position) {
            return None;
        }
        let tiles_x = self.number_of_x_tiles_at_level(level);
        let tiles_y = self.number_of_y_tiles_at_level(level);
        let tile_width = self.rectangle.width() / f64::from(tiles_x);
        let tile_height = self.rectangle.height() / f64::from(tiles_y);

        Some(TileKey::new(
            level,
            grid_index((position.longitude - self.rectangle.west) / tile_width, tiles_x),
            grid_index((self.rectangle.north - position.latitude) / tile_height, tiles_y),
        ))
    }
}

/// Spherical Mercator tiling (EPSG:3857) with a single level-zero tile.
#[derive(Debug, Clone, Copy)]
pub struct WebMercatorTilingScheme {
    /// Semi-major axis of the projection sphere, in metres.
    radius: f64,
}

impl Default for WebMercatorTilingScheme {
    fn default() -> Self {
        Self {
            radius: crate::ellipsoid::Ellipsoid::WGS84.maximum_radius(),
        }
    }
}

impl WebMercatorTilingScheme {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Half the projected extent, in metres.
    fn half_extent(&self) -> f64 {
        self.radius * PI
    }

    fn latitude_from_y(&self, y: f64) -> f64 {
        FRAC_PI_2 - 2.0 * (-y / self.radius).exp().atan()
    }

    fn y_from_latitude(&self, latitude: f64) -> f64 {
        self.radius * (FRAC_PI_4 + latitude * 0.5).tan().ln()
    }
}

impl TilingScheme for WebMercatorTilingScheme {
    fn rectangle(&self) -> Rectangle {
        let max_latitude = self.latitude_from_y(self.half_extent());
        Rectangle::new(-PI, -max_latitude, PI, max_latitude)
    }

    fn level_zero_tiles_x(&self) -> u32 {
        1
    }

    fn level_zero_tiles_y(&self) -> u32 {
        1
    }

    fn tile_to_rectangle(&self, key: TileKey) -> Rectangle {
        let extent = self.half_extent();
        let tile_width = 2.0 * extent / f64::from(self.number_of_x_tiles_at_level(key.level));
        let tile_height = 2.0 * extent / f64::from(self.number_of_y_tiles_at_level(key.level));

        let west = -extent + f64::from(key.x) * tile_width;
        let north = extent - f64::from(key.y) * tile_height;

        Rectangle::new(
            west / self.radius,
            self.latitude_from_y(north - tile_height),
            (west + tile_width) / self.radius,
            self.latitude_from_y(north),
        )
    }

    fn position_to_tile(&self, position: Cartographic, level: u32) -> Option<TileKey> {
        if !self.rectangle().contains(position) {
            return None;
        }
        let extent = self.half_extent();
        let tiles_x = self.number_of_x_tiles_at_level(level);
        let tiles_y = self.number_of_y_tiles_at_level(level);
        let tile_width = 2.0 * extent / f64::from(tiles_x);
        let tile_height = 2.0 * extent / f64::from(tiles_y);

        let x = position.longitude * self.radius + extent;
        let y = extent - self.y_from_latitude(position.latitude);
        Some(TileKey::new(
            level,
            grid_index(x / tile_width, tiles_x),
            grid_index(y / tile_height, tiles_y),
        ))
    }
}

/// Truncate a fractional tile coordinate, clamping the far edge into the last tile.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn grid_index(fraction: f64, count: u32) -> u32 {
    (fraction.max(0.0) as u32).min(count - 1)
}

/// Row-order convention of a published tile set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TileScheme {
    /// Row 0 at the south edge.
    #[default]
    Tms,
    /// Row 0 at the north edge.
    SlippyMap,
}

impl TileScheme {
    /// Parse the `scheme` value of a metadata document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tms" => Some(Self::Tms),
            "slippyMap" => Some(Self::SlippyMap),
            _ => None,
        }
    }

    /// Convert a row between this scheme and the internal north-first
    /// convention. The conversion is its own inverse.
    ///
    /// Returns `None` for rows outside the grid at `level`.
    #[must_use]
    pub fn flip_y(self, tiling: &dyn TilingScheme, level: u32, y: u32) -> Option<u32> {
        if level > MAXIMUM_LEVEL {
            return None;
        }
        let rows = tiling.number_of_y_tiles_at_level(level);
        if y >= rows {
            return None;
        }
        match self {
            Self::Tms => Some(rows - y - 1),
            Self::SlippyMap => Some(y),
        }
    }

    /// Convert a published range into the internal convention.
    ///
    /// Returns `None` for ranges that are inverted or fall outside the grid.
    #[must_use]
    pub fn to_internal(
        self,
        tiling: &dyn TilingScheme,
        level: u32,
        range: &TileRange,
    ) -> Option<TileRange> {
        if level > MAXIMUM_LEVEL
            || range.start_x > range.end_x
            || range.start_y > range.end_y
            || range.end_x >= tiling.number_of_x_tiles_at_level(level)
        {
            return None;
        }
        let north = self.flip_y(tiling, level, range.start_y)?;
        let south = self.flip_y(tiling, level, range.end_y)?;
        Some(TileRange::new(
            range.start_x,
            north.min(south),
            range.end_x,
            north.max(south),
        ))
    }
}
