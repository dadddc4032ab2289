//! Conversion of geometry coordinates into the reference projection (WGS84 lon/lat).
//!
//! Tile bounds are always expressed in the reference projection, so every
//! envelope is passed through a [`CoordinateTransform`] before it is compared
//! with a tile.

use crate::error::{ClusterError, Result};
use geo::Coord;
use geocluster_types::Envelope;
use std::f64::consts::PI;
use std::sync::Arc;

pub const WGS84: &str = "EPSG:4326";
pub const WEB_MERCATOR: &str = "EPSG:3857";

const EARTH_RADIUS: f64 = 6_378_137.0;

/// Maps coordinates of one SRID into the reference projection.
pub trait CoordinateTransform: Send + Sync {
    fn transform_coord(&self, coord: Coord<f64>) -> Coord<f64>;

    /// Transform an envelope by its corners.
    ///
    /// Exact for axis-aligned projections such as the ones supported here,
    /// where lines of constant x and y stay lines of constant longitude and
    /// latitude.
    fn transform_envelope(&self, envelope: &Envelope) -> Envelope {
        if envelope.is_empty() {
            return *envelope;
        }
        let min = self.transform_coord(Coord {
            x: envelope.min_x,
            y: envelope.min_y,
        });
        let max = self.transform_coord(Coord {
            x: envelope.max_x,
            y: envelope.max_y,
        });
        Envelope::new(min.x, min.y, max.x, max.y)
    }

    fn is_identity(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl CoordinateTransform for Identity {
    fn transform_coord(&self, coord: Coord<f64>) -> Coord<f64> {
        coord
    }

    fn transform_envelope(&self, envelope: &Envelope) -> Envelope {
        *envelope
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Spherical Web-Mercator metres to WGS84 degrees.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercatorToWgs84;

impl CoordinateTransform for WebMercatorToWgs84 {
    fn transform_coord(&self, coord: Coord<f64>) -> Coord<f64> {
        let lon = (coord.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (coord.y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        Coord { x: lon, y: lat }
    }
}

/// Transform from `srid` into the reference projection.
///
/// # Examples
///
/// ```
/// use geocluster::projection::transform_for;
///
/// assert!(transform_for("EPSG:4326").unwrap().is_identity());
/// assert!(transform_for("EPSG:5186").is_err());
/// ```
pub fn transform_for(srid: &str) -> Result<Arc<dyn CoordinateTransform>> {
    match srid.trim().to_ascii_uppercase().as_str() {
        WGS84 | "" => Ok(Arc::new(Identity)),
        WEB_MERCATOR | "EPSG:900913" => Ok(Arc::new(WebMercatorToWgs84)),
        other => Err(ClusterError::UnsupportedSrid(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let trans = transform_for("epsg:4326").unwrap();
        let env = Envelope::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(trans.transform_envelope(&env), env);
    }

    #[test]
    fn test_web_mercator_inverse() {
        let trans = transform_for(WEB_MERCATOR).unwrap();
        let origin = trans.transform_coord(Coord { x: 0.0, y: 0.0 });
        assert!(origin.x.abs() < 1e-12 && origin.y.abs() < 1e-12);

        let corner = trans.transform_coord(Coord {
            x: PI * EARTH_RADIUS,
            y: PI * EARTH_RADIUS,
        });
        assert!((corner.x - 180.0).abs() < 1e-9);
        assert!((corner.y - crate::tile::MAX_LATITUDE).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_srid() {
        assert!(matches!(
            transform_for("EPSG:5179"),
            Err(ClusterError::UnsupportedSrid(_))
        ));
    }
}
