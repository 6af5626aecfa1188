//! Packed quadtree tile keys.
//!
//! A [`TileKey`] stores `(x, y, zoom)` in a single `u64` so it can be used
//! directly as an ordered map key and written to disk as one fixed-size field.
//!
//! # Layout
//!
//! ```text
//!  63        56 55                      28 27                       0
//! ┌────────────┬──────────────────────────┬──────────────────────────┐
//! │  zoom + 1  │          y + 1           │          x + 1           │
//! │  (8 bits)  │        (28 bits)         │        (28 bits)         │
//! └────────────┴──────────────────────────┴──────────────────────────┘
//! ```
//!
//! Every component is biased by one, so the all-zero value never names a
//! real tile and can be used as "unset" in on-disk records. Because zoom
//! occupies the high bits, comparing packed values orders keys by zoom
//! first, then row, then column.

use std::fmt;

use thiserror::Error;

/// Number of bits used for each of the x and y fields.
pub const XY_BITS: u32 = 28;

/// Number of bits used for the zoom field.
pub const ZOOM_BITS: u32 = 8;

/// Largest x or y value that can be packed (the field stores value + 1).
pub const MAX_XY: u32 = (1 << XY_BITS) - 2;

/// Largest zoom level that can be packed (the field stores zoom + 1).
pub const MAX_KEY_ZOOM: u8 = u8::MAX - 1;

const XY_MASK: u64 = (1 << XY_BITS) - 1;
const ZOOM_MASK: u64 = (1 << ZOOM_BITS) - 1;
const Y_SHIFT: u32 = XY_BITS;
const ZOOM_SHIFT: u32 = XY_BITS * 2;

/// Errors produced when building a key from out-of-range components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileKeyError {
    /// Column does not fit in the packed x field.
    #[error("tile x {0} exceeds maximum {MAX_XY}")]
    XOutOfRange(u32),

    /// Row does not fit in the packed y field.
    #[error("tile y {0} exceeds maximum {MAX_XY}")]
    YOutOfRange(u32),

    /// Zoom does not fit in the packed zoom field.
    #[error("zoom {0} exceeds maximum {MAX_KEY_ZOOM}")]
    ZoomOutOfRange(u8),

    /// Raw value has a zero field and therefore names no tile.
    #[error("raw key {0:#018x} is not a valid packed tile key")]
    InvalidRaw(u64),
}

/// A tile address packed into 64 bits.
///
/// Equality, hashing and ordering all derive from the packed integer, so a
/// `BTreeMap<TileKey, _>` iterates in `(zoom, y, x)` order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey(u64);

impl TileKey {
    /// Packs `(x, y, zoom)` into a key.
    ///
    /// # Panics
    ///
    /// Panics if a component is out of range. Use [`TileKey::try_new`] for
    /// untrusted input.
    pub fn new(x: u32, y: u32, zoom: u8) -> Self {
        match Self::try_new(x, y, zoom) {
            Ok(key) => key,
            Err(e) => panic!("{}", e),
        }
    }

    /// Packs `(x, y, zoom)` into a key, rejecting out-of-range components.
    pub fn try_new(x: u32, y: u32, zoom: u8) -> Result<Self, TileKeyError> {
        if x > MAX_XY {
            return Err(TileKeyError::XOutOfRange(x));
        }
        if y > MAX_XY {
            return Err(TileKeyError::YOutOfRange(y));
        }
        if zoom > MAX_KEY_ZOOM {
            return Err(TileKeyError::ZoomOutOfRange(zoom));
        }

        let packed = (x as u64 + 1)
            | ((y as u64 + 1) << Y_SHIFT)
            | ((zoom as u64 + 1) << ZOOM_SHIFT);
        Ok(Self(packed))
    }

    /// Rebuilds a key from its packed representation.
    ///
    /// Fails if any field is zero, which can only happen for values that were
    /// never produced by [`TileKey::new`].
    pub fn from_raw(raw: u64) -> Result<Self, TileKeyError> {
        let x = raw & XY_MASK;
        let y = (raw >> Y_SHIFT) & XY_MASK;
        let zoom = (raw >> ZOOM_SHIFT) & ZOOM_MASK;
        if x == 0 || y == 0 || zoom == 0 {
            return Err(TileKeyError::InvalidRaw(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the packed representation.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Column (x) of the tile.
    #[inline]
    pub fn x(self) -> u32 {
        ((self.0 & XY_MASK) - 1) as u32
    }

    /// Row (y) of the tile.
    #[inline]
    pub fn y(self) -> u32 {
        (((self.0 >> Y_SHIFT) & XY_MASK) - 1) as u32
    }

    /// Zoom level of the tile.
    #[inline]
    pub fn zoom(self) -> u8 {
        (((self.0 >> ZOOM_SHIFT) & ZOOM_MASK) - 1) as u8
    }

    /// Returns the components as an `(x, y, zoom)` tuple.
    #[inline]
    pub fn decode(self) -> (u32, u32, u8) {
        (self.x(), self.y(), self.zoom())
    }

    /// Bing-style quadkey for this tile.
    ///
    /// Each zoom level contributes one base-4 digit; zoom 0 yields an empty
    /// string.
    pub fn quadkey(self) -> String {
        let (x, y, zoom) = self.decode();
        let mut quadkey = String::with_capacity(zoom as usize);
        for level in (1..=zoom as u32).rev() {
            let mask = 1u32.checked_shl(level - 1).unwrap_or(0);
            let mut digit = b'0';
            if x & mask != 0 {
                digit += 1;
            }
            if y & mask != 0 {
                digit += 2;
            }
            quadkey.push(digit as char);
        }
        quadkey
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileKey")
            .field("x", &self.x())
            .field("y", &self.y())
            .field("zoom", &self.zoom())
            .finish()
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom(), self.x(), self.y())
    }
}

impl TryFrom<u64> for TileKey {
    type Error = TileKeyError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<TileKey> for u64 {
    fn from(key: TileKey) -> Self {
        key.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_decode_components() {
        let key = TileKey::new(1, 2, 3);
        assert_eq!(key.x(), 1);
        assert_eq!(key.y(), 2);
        assert_eq!(key.zoom(), 3);
        assert_eq!(key.decode(), (1, 2, 3));
    }

    #[test]
    fn test_origin_is_not_zero() {
        let key = TileKey::new(0, 0, 0);
        assert_ne!(key.as_u64(), 0);
        assert_eq!(key.decode(), (0, 0, 0));
    }

    #[test]
    fn test_extremes_roundtrip() {
        let key = TileKey::new(MAX_XY, MAX_XY, MAX_KEY_ZOOM);
        assert_eq!(key.decode(), (MAX_XY, MAX_XY, MAX_KEY_ZOOM));
    }

    #[test]
    fn test_try_new_rejects_out_of_range() {
        assert_eq!(
            TileKey::try_new(MAX_XY + 1, 0, 0),
            Err(TileKeyError::XOutOfRange(MAX_XY + 1))
        );
        assert_eq!(
            TileKey::try_new(0, MAX_XY + 1, 0),
            Err(TileKeyError::YOutOfRange(MAX_XY + 1))
        );
        assert_eq!(
            TileKey::try_new(0, 0, u8::MAX),
            Err(TileKeyError::ZoomOutOfRange(u8::MAX))
        );
    }

    #[test]
    #[should_panic]
    fn test_new_panics_out_of_range() {
        let _ = TileKey::new(u32::MAX, 0, 0);
    }

    #[test]
    fn test_from_raw_rejects_zero_fields() {
        assert!(TileKey::from_raw(0).is_err());
        // zoom field empty
        assert!(TileKey::from_raw(1 | (1 << Y_SHIFT)).is_err());

        let key = TileKey::new(5, 6, 7);
        assert_eq!(TileKey::from_raw(key.as_u64()), Ok(key));
    }

    #[test]
    fn test_map_iterates_zoom_then_row_then_col() {
        let mut map = BTreeMap::new();
        map.insert(TileKey::new(9, 0, 2), "b");
        map.insert(TileKey::new(0, 9, 1), "a");
        map.insert(TileKey::new(0, 1, 2), "c");
        map.insert(TileKey::new(3, 1, 2), "d");

        let order: Vec<_> = map.values().copied().collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_quadkey() {
        assert_eq!(TileKey::new(0, 0, 0).quadkey(), "");
        assert_eq!(TileKey::new(1, 0, 1).quadkey(), "1");
        assert_eq!(TileKey::new(0, 1, 1).quadkey(), "2");
        // Reference value from the Bing Maps tile system documentation
        assert_eq!(TileKey::new(3, 5, 3).quadkey(), "213");
    }

    #[test]
    fn test_display() {
        assert_eq!(TileKey::new(4, 5, 6).to_string(), "6/4/5");
    }

    proptest! {
        #[test]
        fn prop_pack_roundtrip(x in 0..=MAX_XY, y in 0..=MAX_XY, zoom in 0..=MAX_KEY_ZOOM) {
            let key = TileKey::new(x, y, zoom);
            prop_assert_eq!(key.decode(), (x, y, zoom));
        }

        #[test]
        fn prop_higher_zoom_is_greater(
            x1 in 0..=MAX_XY, y1 in 0..=MAX_XY,
            x2 in 0..=MAX_XY, y2 in 0..=MAX_XY,
            zoom in 0..MAX_KEY_ZOOM,
        ) {
            let low = TileKey::new(x1, y1, zoom);
            let high = TileKey::new(x2, y2, zoom + 1);
            prop_assert!(high > low);
        }
    }
}
