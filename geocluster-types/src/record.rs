use crate::envelope::Envelope;
use bytes::Bytes;
use geo::{BoundingRect, Geometry};
use serde::{Deserialize, Serialize};

/// Column types understood by the record codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    Long,
    Double,
    String,
    Binary,
    Geometry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of columns describing every record of a dataset.
///
/// # Examples
///
/// ```
/// use geocluster_types::{DataType, RecordSchema};
///
/// let schema = RecordSchema::new()
///     .with_column("id", DataType::Long)
///     .with_column("the_geom", DataType::Geometry);
/// assert_eq!(schema.column_index("the_geom"), Some(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    columns: Vec<Column>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type));
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// The geometry column of a dataset together with the SRID its coordinates use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryColumnInfo {
    pub name: String,
    pub srid: String,
}

impl GeometryColumnInfo {
    pub fn new(name: impl Into<String>, srid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            srid: srid.into(),
        }
    }
}

/// Record schema plus its designated geometry column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSchema {
    pub schema: RecordSchema,
    pub geometry: GeometryColumnInfo,
}

impl ClusterSchema {
    pub fn new(schema: RecordSchema, geometry: GeometryColumnInfo) -> Self {
        Self { schema, geometry }
    }

    /// Position of the geometry column, or `None` if the schema does not
    /// declare a geometry column with that name.
    pub fn geometry_column_index(&self) -> Option<usize> {
        self.schema
            .column(&self.geometry.name)
            .filter(|c| c.data_type == DataType::Geometry)
            .and_then(|_| self.schema.column_index(&self.geometry.name))
    }

    pub fn srid(&self) -> &str {
        &self.geometry.srid
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Bytes),
    Geometry(Geometry<f64>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type this value carries; `None` for `Null`, which fits any column.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int),
            Value::Long(_) => Some(DataType::Long),
            Value::Double(_) => Some(DataType::Double),
            Value::String(_) => Some(DataType::String),
            Value::Binary(_) => Some(DataType::Binary),
            Value::Geometry(_) => Some(DataType::Geometry),
        }
    }

    pub fn as_geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Value::Geometry(geom) => Some(geom),
            _ => None,
        }
    }
}

impl From<Geometry<f64>> for Value {
    fn from(geom: Geometry<f64>) -> Self {
        Value::Geometry(geom)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// A typed tuple laid out in schema column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn geometry(&self, idx: usize) -> Option<&Geometry<f64>> {
        self.values.get(idx).and_then(Value::as_geometry)
    }

    /// Envelope of the geometry at `idx` in the geometry's own coordinates.
    ///
    /// Returns `None` for a missing, non-geometry or empty geometry value.
    pub fn geometry_envelope(&self, idx: usize) -> Option<Envelope> {
        self.geometry(idx)
            .and_then(|geom| geom.bounding_rect())
            .map(Envelope::from)
    }

    /// True if the record has one value per column and every non-null value
    /// matches its column type.
    pub fn conforms_to(&self, schema: &RecordSchema) -> bool {
        self.values.len() == schema.len()
            && self
                .values
                .iter()
                .zip(schema.columns())
                .all(|(v, c)| v.data_type().is_none_or(|t| t == c.data_type))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// A record paired with its envelope in the reference projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedRecord {
    pub envelope: Envelope,
    pub record: Record,
}

impl TaggedRecord {
    pub fn new(envelope: Envelope, record: Record) -> Self {
        Self { envelope, record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Point, polygon};

    fn schema() -> RecordSchema {
        RecordSchema::new()
            .with_column("id", DataType::Long)
            .with_column("name", DataType::String)
            .with_column("the_geom", DataType::Geometry)
    }

    #[test]
    fn test_geometry_column_lookup() {
        let gschema = ClusterSchema::new(schema(), GeometryColumnInfo::new("the_geom", "EPSG:4326"));
        assert_eq!(gschema.geometry_column_index(), Some(2));

        let wrong = ClusterSchema::new(schema(), GeometryColumnInfo::new("name", "EPSG:4326"));
        assert_eq!(wrong.geometry_column_index(), None);
    }

    #[test]
    fn test_record_conformance() {
        let rec = Record::new(vec![
            Value::Long(1),
            Value::Null,
            Value::Geometry(Point::new(1.0, 2.0).into()),
        ]);
        assert!(rec.conforms_to(&schema()));

        let bad = Record::new(vec![Value::Long(1), Value::Long(2), Value::Null]);
        assert!(!bad.conforms_to(&schema()));
    }

    #[test]
    fn test_geometry_envelope() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 0.0, y: 0.0)];
        let rec = Record::new(vec![Value::Long(1), Value::Null, Value::Geometry(poly.into())]);
        assert_eq!(rec.geometry_envelope(2), Some(Envelope::new(0.0, 0.0, 4.0, 2.0)));
        assert_eq!(rec.geometry_envelope(1), None);
    }
}
