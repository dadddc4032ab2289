//! Quad-key tile addressing.
//!
//! Tiles follow the Web-Mercator quadrant subdivision of the globe: the empty
//! key is the whole domain (longitude -180..180, latitude about ±85.0511) and
//! every appended digit selects one quadrant of the parent tile:
//!
//! ```text
//!   +---+---+
//!   | 0 | 1 |
//!   +---+---+
//!   | 2 | 3 |
//!   +---+---+
//! ```
//!
//! Bounds are computed from integer tile coordinates, so the four children of a
//! tile share their edges bit-for-bit with each other and with the parent.

use crate::error::{ClusterError, Result};
use geocluster_types::Envelope;
use std::f64::consts::PI;

/// Key of the synthetic cluster holding records that match no tile.
pub const OUTLIERS_KEY: &str = "outliers";

/// Deepest supported tile level.
pub const MAX_LEVEL: usize = 31;

/// Latitude limit of the Web-Mercator domain.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub const MIN_LONGITUDE: f64 = -180.0;
pub const MAX_LONGITUDE: f64 = 180.0;

/// A tile in integer coordinates: `x` grows eastward, `y` southward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub x: u64,
    pub y: u64,
    pub level: usize,
}

impl Tile {
    pub const ROOT: Tile = Tile {
        x: 0,
        y: 0,
        level: 0,
    };

    pub fn from_quad_key(quad_key: &str) -> Result<Tile> {
        let mut tile = Tile::ROOT;
        for digit in digits_of(quad_key)? {
            tile = tile.child(digit);
        }
        Ok(tile)
    }

    pub fn quad_key(&self) -> String {
        (1..=self.level)
            .rev()
            .map(|shift| {
                let bit = 1u64 << (shift - 1);
                let mut digit = 0u8;
                if self.x & bit != 0 {
                    digit += 1;
                }
                if self.y & bit != 0 {
                    digit += 2;
                }
                char::from(b'0' + digit)
            })
            .collect()
    }

    /// Child tile for `digit` (0..=3).
    pub fn child(&self, digit: u8) -> Tile {
        Tile {
            x: self.x * 2 + u64::from(digit & 1),
            y: self.y * 2 + u64::from(digit >> 1),
            level: self.level + 1,
        }
    }

    pub fn bounds(&self) -> Envelope {
        let n = 1u64 << self.level;
        Envelope::new(
            lon_of(self.x, n),
            lat_of(self.y + 1, n),
            lon_of(self.x + 1, n),
            lat_of(self.y, n),
        )
    }
}

fn lon_of(x: u64, n: u64) -> f64 {
    (x as f64 / n as f64) * 360.0 + MIN_LONGITUDE
}

fn lat_of(y: u64, n: u64) -> f64 {
    let ratio = y as f64 / n as f64;
    (PI * (1.0 - 2.0 * ratio)).sinh().atan().to_degrees()
}

/// Digits of a quad-key, each in `0..=3`.
pub fn digits_of(quad_key: &str) -> Result<Vec<u8>> {
    if quad_key.len() > MAX_LEVEL {
        return Err(ClusterError::InvalidQuadKey(quad_key.to_string()));
    }
    quad_key
        .bytes()
        .map(|b| match b {
            b'0'..=b'3' => Ok(b - b'0'),
            _ => Err(ClusterError::InvalidQuadKey(quad_key.to_string())),
        })
        .collect()
}

pub fn is_valid_quad_key(quad_key: &str) -> bool {
    digits_of(quad_key).is_ok()
}

pub fn is_outliers(quad_key: &str) -> bool {
    quad_key == OUTLIERS_KEY
}

/// Rectangular bounds of the tile addressed by `quad_key`.
///
/// # Examples
///
/// ```
/// use geocluster::tile::bounds_of;
///
/// let west = bounds_of("0").unwrap();
/// assert_eq!(west.min_x, -180.0);
/// assert_eq!(west.max_x, 0.0);
/// assert_eq!(west.min_y, 0.0);
/// ```
pub fn bounds_of(quad_key: &str) -> Result<Envelope> {
    Ok(Tile::from_quad_key(quad_key)?.bounds())
}

/// Bounds of the whole tile domain.
pub fn domain_bounds() -> Envelope {
    Tile::ROOT.bounds()
}

/// Longest quad-key whose tile contains `envelope`.
///
/// Returns the empty key for an empty envelope or one that is not inside any
/// single quadrant (including envelopes reaching outside the domain).
pub fn smallest_tile_containing(envelope: &Envelope) -> String {
    let mut tile = Tile::ROOT;
    if envelope.is_empty() || !tile.bounds().contains(envelope) {
        return String::new();
    }
    while tile.level < MAX_LEVEL {
        let next = (0..4u8)
            .map(|digit| tile.child(digit))
            .find(|child| child.bounds().contains(envelope));
        match next {
            Some(child) => tile = child,
            None => break,
        }
    }
    tile.quad_key()
}

pub fn parent_key(quad_key: &str) -> Option<&str> {
    if quad_key.is_empty() {
        None
    } else {
        Some(&quad_key[..quad_key.len() - 1])
    }
}

/// Position of the tile among its siblings (its last digit).
pub fn sibling_ordinal(quad_key: &str) -> Option<usize> {
    quad_key
        .bytes()
        .last()
        .filter(|b| (b'0'..=b'3').contains(b))
        .map(|b| usize::from(b - b'0'))
}

pub fn child_key(quad_key: &str, digit: usize) -> String {
    let mut key = String::with_capacity(quad_key.len() + 1);
    key.push_str(quad_key);
    key.push(char::from(b'0' + digit as u8));
    key
}

pub fn child_keys(quad_key: &str) -> [String; 4] {
    [0, 1, 2, 3].map(|digit| child_key(quad_key, digit))
}

/// True if the two tiles share interior area, which for quadrant tiles means
/// one key is a prefix of the other. The outlier key overlaps nothing.
pub fn tiles_overlap(a: &str, b: &str) -> bool {
    if is_outliers(a) || is_outliers(b) {
        return false;
    }
    a.starts_with(b) || b.starts_with(a)
}

/// Length of the longest common prefix of two keys.
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_bounds() {
        let root = bounds_of("").unwrap();
        assert_eq!(root.min_x, -180.0);
        assert_eq!(root.max_x, 180.0);
        assert!((root.max_y - MAX_LATITUDE).abs() < 1e-9);
        assert!((root.min_y + MAX_LATITUDE).abs() < 1e-9);
    }

    #[test]
    fn test_digit_orientation() {
        let nw = bounds_of("0").unwrap();
        let ne = bounds_of("1").unwrap();
        let sw = bounds_of("2").unwrap();
        let se = bounds_of("3").unwrap();
        assert!(nw.min_x < 0.0 && nw.min_y >= 0.0);
        assert!(ne.min_x >= 0.0 && ne.min_y >= 0.0);
        assert!(sw.max_x <= 0.0 && sw.max_y <= 0.0);
        assert!(se.min_x >= 0.0 && se.max_y <= 0.0);
    }

    #[test]
    fn test_children_exactly_tile_parent() {
        for key in ["", "0", "13", "2031", "3210321", "0123012301230"] {
            let parent = bounds_of(key).unwrap();
            let children: Vec<Envelope> =
                child_keys(key).iter().map(|k| bounds_of(k).unwrap()).collect();

            let mut union = Envelope::empty();
            for child in &children {
                union.expand_to_include(child);
            }
            assert_eq!(union, parent, "union of children of '{key}'");

            let area: f64 = children.iter().map(Envelope::area).sum();
            assert!((area - parent.area()).abs() <= parent.area() * 1e-12);

            for i in 0..4 {
                for j in (i + 1)..4 {
                    assert!(
                        !children[i].overlaps_interior(&children[j]),
                        "children {i} and {j} of '{key}' overlap"
                    );
                }
            }
        }
    }

    #[test]
    fn test_quad_key_round_trip() {
        for key in ["", "0", "3", "0123", "33333333", "1020301"] {
            let tile = Tile::from_quad_key(key).unwrap();
            assert_eq!(tile.level, key.len());
            assert_eq!(tile.quad_key(), key);
        }
    }

    #[test]
    fn test_invalid_quad_keys() {
        assert!(bounds_of("014").is_err());
        assert!(bounds_of(OUTLIERS_KEY).is_err());
        assert!(digits_of(&"0".repeat(MAX_LEVEL + 1)).is_err());
        assert_eq!(digits_of("0123").unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_smallest_tile_containing() {
        let tile = bounds_of("0213").unwrap();
        let inner = Envelope::new(
            tile.min_x + tile.width() * 0.1,
            tile.min_y + tile.height() * 0.1,
            tile.min_x + tile.width() * 0.2,
            tile.min_y + tile.height() * 0.2,
        );
        let key = smallest_tile_containing(&inner);
        assert!(key.starts_with("0213"));
        assert!(bounds_of(&key).unwrap().contains(&inner));

        // straddles the prime meridian and the equator
        let centre = Envelope::new(-1.0, -1.0, 1.0, 1.0);
        assert_eq!(smallest_tile_containing(&centre), "");
        assert_eq!(smallest_tile_containing(&Envelope::empty()), "");
    }

    #[test]
    fn test_key_relations() {
        assert_eq!(parent_key("0123"), Some("012"));
        assert_eq!(parent_key(""), None);
        assert_eq!(sibling_ordinal("0123"), Some(3));
        assert_eq!(sibling_ordinal(""), None);
        assert!(tiles_overlap("01", "0123"));
        assert!(!tiles_overlap("01", "02"));
        assert!(!tiles_overlap(OUTLIERS_KEY, OUTLIERS_KEY));
        assert_eq!(common_prefix_len("0123", "0130"), 2);
    }
}
