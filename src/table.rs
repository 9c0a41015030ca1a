use geo::MultiPolygon;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// A row of a geometry table: string attributes plus an optional polygon geometry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub fields: BTreeMap<String, String>,
    /// `None` is a null geometry; an empty `MultiPolygon` is an empty one
    pub geometry: Option<MultiPolygon<f64>>,
}

impl Record {
    pub fn new(geometry: Option<MultiPolygon<f64>>) -> Self {
        Self {
            fields: BTreeMap::new(),
            geometry,
        }
    }

    pub fn with_field(mut self, column: &str, value: impl Into<String>) -> Self {
        self.fields.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.fields.insert(column.to_string(), value.into());
    }

    /// True when the geometry is missing or has no polygons
    pub fn is_empty_geometry(&self) -> bool {
        self.geometry.as_ref().map_or(true, |g| g.0.is_empty())
    }
}

// Hash of the fields and geometry coordinates; rows equal under `==` hash alike
fn record_hash(record: &Record) -> u64 {
    let mut hasher = DefaultHasher::new();
    record.fields.hash(&mut hasher);
    match &record.geometry {
        None => 0u8.hash(&mut hasher),
        Some(multi) => {
            1u8.hash(&mut hasher);
            for polygon in &multi.0 {
                polygon.interiors().len().hash(&mut hasher);
                for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                    ring.0.len().hash(&mut hasher);
                    for coord in &ring.0 {
                        // adding 0.0 folds -0.0 into 0.0
                        (coord.x + 0.0).to_bits().hash(&mut hasher);
                        (coord.y + 0.0).to_bits().hash(&mut hasher);
                    }
                }
            }
        }
    }
    hasher.finish()
}

/// Tabular polygon data with ordered attribute columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeometryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
    /// Coordinate reference system as WKT
    pub crs: Option<String>,
}

impl GeometryTable {
    pub fn new(columns: Vec<String>, crs: Option<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            crs,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value of `column` in row `index`
    pub fn value(&self, index: usize, column: &str) -> Option<&str> {
        self.rows.get(index).and_then(|row| row.get(column))
    }

    /// Set a value, registering the column when it is new
    pub fn set_value(&mut self, index: usize, column: &str, value: impl Into<String>) -> Result<()> {
        let len = self.rows.len();
        let row = self.rows.get_mut(index).ok_or_else(|| {
            Error::InvalidArgument(format!("row {} out of range for {} rows", index, len))
        })?;
        row.set(column, value);
        self.add_column(column);
        Ok(())
    }

    /// Fail with `MissingColumn` unless the column exists
    pub fn require_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(Error::MissingColumn(column.to_string()))
        }
    }

    /// Append a column if absent; existing rows are left without a value
    pub fn add_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    /// Insert a column at a position, moving it if it already exists
    pub fn insert_column(&mut self, index: usize, column: &str) {
        if let Some(current) = self.column_index(column) {
            self.columns.remove(current);
        }
        let index = index.min(self.columns.len());
        self.columns.insert(index, column.to_string());
    }

    /// Push a row, registering any column it introduces
    pub fn push(&mut self, record: Record) {
        for key in record.fields.keys() {
            if !self.has_column(key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(record);
    }

    pub fn retain<F>(&mut self, f: F)
    where
        F: FnMut(&Record) -> bool,
    {
        self.rows.retain(f);
    }

    /// Remove rows equal to an earlier row, keeping the first occurrence
    pub fn drop_duplicates(&mut self) {
        let mut seen: HashMap<u64, Vec<Record>> = HashMap::with_capacity(self.rows.len());
        self.rows.retain(|row| {
            let bucket = seen.entry(record_hash(row)).or_default();
            if bucket.contains(row) {
                false
            } else {
                bucket.push(row.clone());
                true
            }
        });
    }

    /// Distinct values of a column in first-seen order
    pub fn unique_values(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|value| seen.insert(value.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Values of the row in column order, empty strings for missing fields
    pub fn row_values(&self, record: &Record) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| record.get(c).unwrap_or_default().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
            (x: 0.0, y: size),
        ]])
    }

    #[test]
    fn test_push_registers_columns() {
        let mut table = GeometryTable::default();
        table.push(Record::new(None).with_field("a", "1"));
        table.push(Record::new(None).with_field("b", "2").with_field("a", "3"));
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.row_values(&table.rows[0]), vec!["1", ""]);
    }

    #[test]
    fn test_drop_duplicates_keeps_first() {
        let mut table = GeometryTable::default();
        table.push(Record::new(Some(square(2.0))).with_field("id", "x"));
        table.push(Record::new(Some(square(2.0))).with_field("id", "x"));
        table.push(Record::new(Some(square(3.0))).with_field("id", "x"));
        table.drop_duplicates();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_drop_duplicates_large_table() {
        let mut table = GeometryTable::default();
        for i in 0..20_000 {
            table.push(Record::new(Some(square(1.0 + i as f64))).with_field("id", (i % 7).to_string()));
        }
        for i in 0..100 {
            table.push(Record::new(Some(square(1.0 + i as f64))).with_field("id", (i % 7).to_string()));
        }
        table.push(Record::new(None).with_field("id", "0"));
        table.push(Record::new(Some(MultiPolygon::new(vec![]))).with_field("id", "0"));
        table.drop_duplicates();
        assert_eq!(table.len(), 20_002);
        assert!(table.rows[20_000].geometry.is_none());
    }

    #[test]
    fn test_drop_duplicates_signed_zero() {
        let mut table = GeometryTable::default();
        table.push(Record::new(Some(MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]]))));
        table.push(Record::new(Some(MultiPolygon::new(vec![polygon![
            (x: -0.0, y: 0.0),
            (x: 1.0, y: -0.0),
            (x: 1.0, y: 1.0),
        ]]))));
        table.drop_duplicates();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unique_values_in_order() {
        let mut table = GeometryTable::default();
        for v in ["b", "a", "b", "c"] {
            table.push(Record::new(None).with_field("k", v));
        }
        assert_eq!(table.unique_values("k"), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_empty_geometry() {
        assert!(Record::new(None).is_empty_geometry());
        assert!(Record::new(Some(MultiPolygon::new(vec![]))).is_empty_geometry());
        assert!(!Record::new(Some(square(1.0))).is_empty_geometry());
    }

    #[test]
    fn test_insert_column_moves_existing() {
        let mut table = GeometryTable::new(vec!["a".into(), "b".into()], None);
        table.insert_column(0, "b");
        assert_eq!(table.columns, vec!["b", "a"]);
        assert!(table.require_column("c").is_err());
    }

    #[test]
    fn test_set_value() {
        let mut table = GeometryTable::default();
        table.push(Record::new(None).with_field("a", "1"));
        table.set_value(0, "b", "2").unwrap();
        assert_eq!(table.value(0, "b"), Some("2"));
        assert_eq!(table.column_index("b"), Some(1));
        assert!(table.set_value(3, "a", "x").is_err());
    }
}
