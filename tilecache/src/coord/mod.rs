//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator tile keys, plus enumeration of the tiles covering a
//! geographic bounding box.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key::TileKey;

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Supported zoom levels. The upper bound keeps tile indices inside the
/// packed key fields.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 24;

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("latitude {0} outside Web Mercator range")]
    InvalidLatitude(f64),

    #[error("longitude {0} outside valid range")]
    InvalidLongitude(f64),

    #[error("zoom level {0} not supported (max {MAX_ZOOM})")]
    InvalidZoom(u8),

    #[error("bounding box is inverted: min ({min_lat}, {min_lon}) > max ({max_lat}, {max_lon})")]
    InvertedBounds {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
}

/// A geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Creates a validated bounding box.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, CoordError> {
        for lat in [min_lat, max_lat] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [min_lon, max_lon] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(CoordError::InvertedBounds {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            });
        }
        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Returns true if the point lies inside the box (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Converts geographic coordinates to a tile key.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level (0 to 24)
#[inline]
pub fn to_tile_key(lat: f64, lon: f64, zoom: u8) -> Result<TileKey, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let n = 2.0_f64.powi(zoom as i32);
    let last = (1u32 << zoom) - 1;

    // lon = 180 and lat = MIN_LAT land exactly on the far edge; clamp them
    // into the last tile.
    let x = (((lon + 180.0) / 360.0 * n) as u32).min(last);

    let lat_rad = lat * PI / 180.0;
    let y = (((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n) as u32).min(last);

    Ok(TileKey::new(x, y, zoom))
}

/// Converts a tile key back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(key: TileKey) -> (f64, f64) {
    let n = 2.0_f64.powi(key.zoom() as i32);

    let lon = key.x() as f64 / n * 360.0 - 180.0;

    let y = key.y() as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}

/// Number of tiles at `zoom` that intersect `bbox`.
pub fn count_tiles_in_bbox(bbox: &BoundingBox, zoom: u8) -> Result<u64, CoordError> {
    let nw = to_tile_key(bbox.max_lat, bbox.min_lon, zoom)?;
    let se = to_tile_key(bbox.min_lat, bbox.max_lon, zoom)?;
    Ok((se.x() - nw.x() + 1) as u64 * (se.y() - nw.y() + 1) as u64)
}

/// Returns every tile key at `zoom` that intersects `bbox`.
///
/// Keys are produced row by row, north to south, west to east within a row.
pub fn tiles_in_bbox(bbox: &BoundingBox, zoom: u8) -> Result<Vec<TileKey>, CoordError> {
    // North-west corner has the smallest row and column.
    let nw = to_tile_key(bbox.max_lat, bbox.min_lon, zoom)?;
    let se = to_tile_key(bbox.min_lat, bbox.max_lon, zoom)?;

    let mut keys = Vec::with_capacity(
        ((se.x() - nw.x() + 1) as usize).saturating_mul((se.y() - nw.y() + 1) as usize),
    );
    for y in nw.y()..=se.y() {
        for x in nw.x()..=se.x() {
            keys.push(TileKey::new(x, y, zoom));
        }
    }
    Ok(keys)
}
