//! Join predicates and their evaluation on record pairs.

use crate::error::{ClusterError, Result};
use crate::projection::{self, CoordinateTransform};
use geo::{Distance, Euclidean, Geometry, Intersects, MapCoords};
use geocluster_types::{ClusterSchema, Envelope, Record};
use std::fmt;
use std::sync::Arc;

/// Spatial relation two records must satisfy to be joined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpatialPredicate {
    Intersects,
    /// Planar distance no greater than the given value, in the units of the
    /// geometries' coordinate system.
    WithinDistance(f64),
}

impl SpatialPredicate {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SpatialPredicate::WithinDistance(d) if !d.is_finite() || d < 0.0 => Err(
                ClusterError::InvalidInput(format!("invalid join distance: {d}")),
            ),
            _ => Ok(()),
        }
    }

    /// Exact test on two geometries in the same coordinate system.
    pub fn evaluate(&self, left: &Geometry<f64>, right: &Geometry<f64>) -> bool {
        match *self {
            SpatialPredicate::Intersects => left.intersects(right),
            SpatialPredicate::WithinDistance(d) => Euclidean.distance(left, right) <= d,
        }
    }

    fn distance(&self) -> f64 {
        match *self {
            SpatialPredicate::Intersects => 0.0,
            SpatialPredicate::WithinDistance(d) => d,
        }
    }
}

impl fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpatialPredicate::Intersects => write!(f, "intersects"),
            SpatialPredicate::WithinDistance(d) => write!(f, "within_distance({d})"),
        }
    }
}

/// Evaluates a predicate between records of two schemas.
///
/// When both geometry columns share a coordinate system the exact test runs
/// on the stored geometries. Otherwise both sides are first mapped to the
/// reference projection, and a within-distance bound is read in its units.
pub(crate) struct PairMatcher {
    predicate: SpatialPredicate,
    left_geom: usize,
    right_geom: usize,
    left_transform: Arc<dyn CoordinateTransform>,
    right_transform: Arc<dyn CoordinateTransform>,
    native: bool,
}

impl PairMatcher {
    pub(crate) fn new(
        predicate: SpatialPredicate,
        left: &ClusterSchema,
        right: &ClusterSchema,
    ) -> Result<Self> {
        predicate.validate()?;
        Ok(Self {
            predicate,
            left_geom: geometry_index(left)?,
            right_geom: geometry_index(right)?,
            left_transform: projection::transform_for(left.srid())?,
            right_transform: projection::transform_for(right.srid())?,
            native: left.srid() == right.srid(),
        })
    }

    /// The same matcher with the sides exchanged.
    pub(crate) fn reversed(&self) -> Self {
        Self {
            predicate: self.predicate,
            left_geom: self.right_geom,
            right_geom: self.left_geom,
            left_transform: Arc::clone(&self.right_transform),
            right_transform: Arc::clone(&self.left_transform),
            native: self.native,
        }
    }

    /// Reference-projection envelope any matching right record intersects.
    pub(crate) fn match_key(&self, left: &Record, left_envelope: &Envelope) -> Envelope {
        let distance = self.predicate.distance();
        if distance == 0.0 {
            return *left_envelope;
        }
        if !self.native {
            return left_envelope.expanded_by(distance);
        }
        match left.geometry_envelope(self.left_geom) {
            Some(native) => self
                .left_transform
                .transform_envelope(&native.expanded_by(distance)),
            None => Envelope::empty(),
        }
    }

    /// Reference-projection distance within which the envelopes of two
    /// matching records lie.
    ///
    /// In a shared native coordinate system the bound is taken where a native
    /// unit spans the most reference units, at the origin for the supported
    /// projections.
    pub(crate) fn search_distance(&self) -> f64 {
        let distance = self.predicate.distance();
        if distance == 0.0 || !self.native || self.left_transform.is_identity() {
            return distance;
        }
        let unit = self
            .left_transform
            .transform_envelope(&Envelope::new(0.0, 0.0, distance, distance));
        unit.width().max(unit.height())
    }

    pub(crate) fn matches(&self, left: &Record, right: &Record) -> bool {
        let (Some(lg), Some(rg)) = (left.geometry(self.left_geom), right.geometry(self.right_geom))
        else {
            return false;
        };
        if self.native {
            self.predicate.evaluate(lg, rg)
        } else {
            let lg = to_reference(lg, self.left_transform.as_ref());
            let rg = to_reference(rg, self.right_transform.as_ref());
            self.predicate.evaluate(&lg, &rg)
        }
    }
}

fn geometry_index(schema: &ClusterSchema) -> Result<usize> {
    schema.geometry_column_index().ok_or_else(|| {
        ClusterError::SchemaMismatch(format!(
            "no geometry column '{}' in the record schema",
            schema.geometry.name
        ))
    })
}

fn to_reference(geom: &Geometry<f64>, transform: &dyn CoordinateTransform) -> Geometry<f64> {
    if transform.is_identity() {
        return geom.clone();
    }
    geom.map_coords(|coord| transform.transform_coord(coord))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, line_string};
    use geocluster_types::{DataType, GeometryColumnInfo, RecordSchema, Value};

    fn schema(srid: &str) -> ClusterSchema {
        ClusterSchema::new(
            RecordSchema::new()
                .with_column("id", DataType::Long)
                .with_column("the_geom", DataType::Geometry),
            GeometryColumnInfo::new("the_geom", srid),
        )
    }

    fn record(geom: Geometry<f64>) -> Record {
        Record::new(vec![Value::Long(0), Value::Geometry(geom)])
    }

    #[test]
    fn test_intersects() {
        let line: Geometry<f64> = line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0)].into();
        let on_line: Geometry<f64> = Point::new(1.0, 1.0).into();
        let off_line: Geometry<f64> = Point::new(1.0, 0.0).into();
        assert!(SpatialPredicate::Intersects.evaluate(&line, &on_line));
        assert!(!SpatialPredicate::Intersects.evaluate(&line, &off_line));
    }

    #[test]
    fn test_within_distance() {
        let a: Geometry<f64> = Point::new(0.0, 0.0).into();
        let b: Geometry<f64> = Point::new(3.0, 4.0).into();
        assert!(SpatialPredicate::WithinDistance(5.0).evaluate(&a, &b));
        assert!(!SpatialPredicate::WithinDistance(4.9).evaluate(&a, &b));
    }

    #[test]
    fn test_rejects_negative_distance() {
        assert!(SpatialPredicate::WithinDistance(-1.0).validate().is_err());
        assert!(SpatialPredicate::WithinDistance(f64::NAN).validate().is_err());
        assert!(SpatialPredicate::Intersects.validate().is_ok());
    }

    #[test]
    fn test_match_key_expands_in_native_units() {
        let matcher = PairMatcher::new(
            SpatialPredicate::WithinDistance(2.0),
            &schema("EPSG:4326"),
            &schema("EPSG:4326"),
        )
        .unwrap();
        let left = record(Point::new(10.0, 10.0).into());
        let key = matcher.match_key(&left, &Envelope::from_point(10.0, 10.0));
        assert_eq!(key, Envelope::new(8.0, 8.0, 12.0, 12.0));
    }

    #[test]
    fn test_mixed_projections_match_in_reference() {
        let matcher = PairMatcher::new(
            SpatialPredicate::Intersects,
            &schema("EPSG:4326"),
            &schema("EPSG:3857"),
        )
        .unwrap();
        let left = record(Point::new(0.0, 0.0).into());
        let right = record(Point::new(0.0, 0.0).into());
        assert!(matcher.matches(&left, &right));
        assert!(matcher.reversed().matches(&right, &left));
    }

    #[test]
    fn test_search_distance_in_reference_units() {
        let geographic = PairMatcher::new(
            SpatialPredicate::WithinDistance(1.5),
            &schema("EPSG:4326"),
            &schema("EPSG:4326"),
        )
        .unwrap();
        assert_eq!(geographic.search_distance(), 1.5);

        let metric = PairMatcher::new(
            SpatialPredicate::WithinDistance(111_320.0),
            &schema("EPSG:3857"),
            &schema("EPSG:3857"),
        )
        .unwrap();
        let degrees = metric.search_distance();
        assert!(degrees > 0.99 && degrees < 1.02, "{degrees}");

        let touching = PairMatcher::new(
            SpatialPredicate::Intersects,
            &schema("EPSG:3857"),
            &schema("EPSG:3857"),
        )
        .unwrap();
        assert_eq!(touching.search_distance(), 0.0);
    }
}
