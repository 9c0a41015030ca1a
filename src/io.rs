use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldDefn, FieldValue, Geometry as GdalGeometry, LayerAccess, LayerOptions, OGRFieldType,
    OGRwkbGeometryType, ToGdal,
};
use gdal::{Dataset, DriverManager};
use geo::{Geometry, MultiPolygon};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::table::{GeometryTable, Record};

pub const GEOMETRY_COLUMN: &str = "geometry";

// Side-car files of an ESRI shapefile
const SHAPEFILE_PARTS: &[&str] = &["shp", "shx", "dbf", "prj", "cpg"];

// DBF string fields default to 80 characters, too short for file paths
const SHP_STRING_WIDTH: i32 = 254;

/// Refuse to overwrite unless `exist_ok`, and make sure the parent directory exists
fn prepare_destination(path: &Path, exist_ok: bool) -> Result<()> {
    if path.exists() && !exist_ok {
        return Err(Error::FileExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Convert any polygonal geometry into a `MultiPolygon`
pub fn to_multipolygon(geometry: Geometry<f64>) -> Result<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Rect(rect) => Ok(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let mut polygons = Vec::new();
            for geometry in collection.0 {
                polygons.extend(to_multipolygon(geometry)?.0);
            }
            Ok(MultiPolygon::new(polygons))
        }
        other => Err(Error::UnsupportedGeometry(
            geometry_type_name(&other).to_string(),
        )),
    }
}

fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn join_values<T: ToString>(values: &[T]) -> String {
    values.iter().map(T::to_string).collect::<Vec<_>>().join(",")
}

/// Attribute value as text; dates are ISO 8601 and lists are comma separated
fn field_value_to_string(value: FieldValue) -> String {
    match value {
        FieldValue::StringValue(s) => s,
        FieldValue::IntegerValue(v) => v.to_string(),
        FieldValue::Integer64Value(v) => v.to_string(),
        FieldValue::RealValue(v) => v.to_string(),
        FieldValue::DateValue(date) => date.format("%Y-%m-%d").to_string(),
        FieldValue::DateTimeValue(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
        FieldValue::StringListValue(values) => values.join(","),
        FieldValue::IntegerListValue(values) => join_values(&values),
        FieldValue::Integer64ListValue(values) => join_values(&values),
        FieldValue::RealListValue(values) => join_values(&values),
    }
}

/// Polygonal geometry in GDAL form; a single polygon stays a `Polygon`
fn polygonal_to_gdal(geometry: &MultiPolygon<f64>) -> Result<GdalGeometry> {
    let converted = match geometry.0.as_slice() {
        [] => GdalGeometry::empty(OGRwkbGeometryType::wkbPolygon)?,
        [polygon] => polygon.to_gdal()?,
        _ => geometry.to_gdal()?,
    };
    Ok(converted)
}

/// Geometry as WKT, e.g. `POLYGON ((0 0,4 0,4 4,0 0))`
pub fn geometry_to_wkt(geometry: &MultiPolygon<f64>) -> Result<String> {
    Ok(polygonal_to_gdal(geometry)?.wkt()?)
}

/// Parse polygonal WKT; `EMPTY` geometries give an empty `MultiPolygon`
pub fn geometry_from_wkt(wkt: &str) -> Result<MultiPolygon<f64>> {
    let geometry = GdalGeometry::from_wkt(wkt)?;
    if geometry.is_empty() {
        return Ok(MultiPolygon::new(vec![]));
    }
    to_multipolygon(geometry.to_geo()?)
}

/// Load a polygon table from a shapefile (or any OGR source), or from a CSV
/// written by `save_as_csv`
pub fn load_shapefile(path: &Path) -> Result<GeometryTable> {
    if path.extension().is_some_and(|ext| ext == "csv") {
        return load_csv(path);
    }

    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer(0)?;
    let crs = layer.spatial_ref().and_then(|srs| srs.to_wkt().ok());
    let columns: Vec<String> = layer.defn().fields().map(|field| field.name()).collect();

    let mut table = GeometryTable::new(columns, crs);
    for feature in layer.features() {
        let geometry = match feature.geometry() {
            Some(geometry) if !geometry.is_empty() => Some(to_multipolygon(geometry.to_geo()?)?),
            Some(_) => Some(MultiPolygon::new(vec![])),
            None => None,
        };
        let mut record = Record::new(geometry);
        for (name, value) in feature.fields() {
            record.set(&name, value.map(field_value_to_string).unwrap_or_default());
        }
        table.rows.push(record);
    }

    info!("Loaded {} rows from {}", table.len(), path.display());
    Ok(table)
}

fn load_csv(path: &Path) -> Result<GeometryTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let columns: Vec<String> = headers
        .iter()
        .filter(|h| *h != GEOMETRY_COLUMN)
        .map(str::to_string)
        .collect();

    let mut table = GeometryTable::new(columns, None);
    for row in reader.records() {
        let row = row?;
        let mut record = Record::new(None);
        for (header, value) in headers.iter().zip(row.iter()) {
            if header == GEOMETRY_COLUMN {
                if !value.trim().is_empty() {
                    record.geometry = Some(geometry_from_wkt(value)?);
                }
            } else {
                record.set(header, value);
            }
        }
        table.rows.push(record);
    }

    info!("Loaded {} rows from {}", table.len(), path.display());
    Ok(table)
}

/// Save the table attributes as CSV, with the geometry as a WKT column
pub fn save_as_csv(table: &GeometryTable, path: &Path, exist_ok: bool) -> Result<()> {
    prepare_destination(path, exist_ok)?;

    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = table.columns.iter().map(String::as_str).collect();
    header.push(GEOMETRY_COLUMN);
    writer.write_record(&header)?;

    for record in &table.rows {
        let mut values = table.row_values(record);
        let geometry = match &record.geometry {
            Some(geometry) => geometry_to_wkt(geometry)?,
            None => String::new(),
        };
        values.push(geometry);
        writer.write_record(&values)?;
    }
    writer.flush()?;

    debug!("Saved {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Save the table as an ESRI shapefile; attributes are written as strings
pub fn save_as_shp(table: &GeometryTable, path: &Path, exist_ok: bool) -> Result<()> {
    prepare_destination(path, exist_ok)?;
    for ext in SHAPEFILE_PARTS {
        let part = path.with_extension(ext);
        if part.exists() {
            fs::remove_file(&part)?;
        }
    }

    let driver = DriverManager::get_driver_by_name("ESRI Shapefile")?;
    let mut dataset = driver.create_vector_only(path)?;
    let srs = match &table.crs {
        Some(wkt) => Some(SpatialRef::from_wkt(wkt)?),
        None => None,
    };
    let layer_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layer".to_string());
    let mut layer = dataset.create_layer(LayerOptions {
        name: &layer_name,
        srs: srs.as_ref(),
        ty: OGRwkbGeometryType::wkbPolygon,
        ..Default::default()
    })?;

    for column in &table.columns {
        let field = FieldDefn::new(column, OGRFieldType::OFTString)?;
        field.set_width(SHP_STRING_WIDTH);
        field.add_to_layer(&layer)?;
    }

    let names: Vec<&str> = table.columns.iter().map(String::as_str).collect();
    for record in &table.rows {
        let geometry = match &record.geometry {
            Some(multi) => polygonal_to_gdal(multi)?,
            None => GdalGeometry::empty(OGRwkbGeometryType::wkbPolygon)?,
        };
        let values: Vec<FieldValue> = table
            .row_values(record)
            .into_iter()
            .map(FieldValue::StringValue)
            .collect();
        layer.create_feature_fields(geometry, &names, &values)?;
    }

    debug!("Saved {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Create the data.yaml descriptor used for YOLO training
pub fn create_dataset_yaml(
    dest: &Path,
    dataset_root: &Path,
    classes: &BTreeMap<u32, String>,
    has_test: bool,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut dataset_yaml = BufWriter::new(File::create(dest)?);
    let absolute_path = fs::canonicalize(dataset_root)?;
    let mut yaml_content = format!(
        "path: {}\ntrain: images/train\nval: images/val\n",
        absolute_path.to_string_lossy()
    );
    if has_test {
        yaml_content.push_str("test: images/test\n");
    } else {
        yaml_content.push_str("test:\n");
    }
    yaml_content.push_str("\nnames:\n");

    // BTreeMap keeps the ids sorted
    for (id, label) in classes {
        yaml_content.push_str(&format!("    {}: {}\n", id, label));
    }
    dataset_yaml.write_all(yaml_content.as_bytes())?;
    dataset_yaml.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, GeometryCollection, Point};

    fn sample_table() -> GeometryTable {
        let mut table = GeometryTable::new(vec!["id".into(), "name".into()], None);
        table.push(
            Record::new(Some(MultiPolygon::new(vec![polygon![
                (x: 0.0, y: 0.0),
                (x: 4.0, y: 0.0),
                (x: 4.0, y: 4.0),
                (x: 0.0, y: 0.0),
            ]])))
            .with_field("id", "1")
            .with_field("name", "a, quoted \"name\""),
        );
        table.push(Record::new(None).with_field("id", "2"));
        table
    }

    #[test]
    fn test_csv_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested/table.csv");
        let table = sample_table();

        save_as_csv(&table, &path, false).unwrap();
        let loaded = load_shapefile(&path).unwrap();

        assert_eq!(loaded.columns, table.columns);
        assert_eq!(loaded.rows[0].fields, table.rows[0].fields);
        assert_eq!(loaded.rows[0].geometry, table.rows[0].geometry);
        assert_eq!(loaded.rows[1].get("name"), Some(""));
        assert!(loaded.rows[1].geometry.is_none());
    }

    #[test]
    fn test_csv_geometry_is_wkt() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("table.csv");
        save_as_csv(&sample_table(), &path, false).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let first_row = text.lines().nth(1).unwrap();
        assert!(first_row.contains("\"POLYGON (("), "{}", first_row);
        assert!(text.lines().nth(2).unwrap().ends_with(','));
    }

    #[test]
    fn test_load_wkt_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stage.csv");
        fs::write(
            &path,
            "Subregion,geometry\n\
             A1,\"POLYGON ((0 0, 2 0, 2 2, 0 2, 0 0))\"\n\
             A2,\"MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))\"\n\
             A3,POLYGON EMPTY\n",
        )
        .unwrap();

        let table = load_shapefile(&path).unwrap();
        assert_eq!(table.columns, vec!["Subregion"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0].geometry.as_ref().unwrap().0[0].exterior().0.len(), 5);
        assert_eq!(table.rows[1].geometry.as_ref().unwrap().0.len(), 2);
        assert!(table.rows[2].geometry.as_ref().unwrap().0.is_empty());
    }

    #[test]
    fn test_field_value_to_string() {
        let date = chrono::NaiveDate::from_ymd_opt(2019, 5, 1).unwrap();
        assert_eq!(field_value_to_string(FieldValue::DateValue(date)), "2019-05-01");
        let datetime = chrono::DateTime::parse_from_rfc3339("2019-05-01T12:30:00+00:00").unwrap();
        assert_eq!(
            field_value_to_string(FieldValue::DateTimeValue(datetime)),
            "2019-05-01T12:30:00"
        );
        assert_eq!(field_value_to_string(FieldValue::IntegerListValue(vec![1, 2])), "1,2");
        assert_eq!(field_value_to_string(FieldValue::RealValue(6.0)), "6");
    }

    #[test]
    fn test_save_refuses_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("table.csv");
        save_as_csv(&sample_table(), &path, false).unwrap();

        let err = save_as_csv(&sample_table(), &path, false).unwrap_err();
        assert!(matches!(err, Error::FileExists(_)));
        assert!(save_as_csv(&sample_table(), &path, true).is_ok());
    }

    #[test]
    fn test_to_multipolygon() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let collection = GeometryCollection::new_from(vec![
            Geometry::Polygon(square.clone()),
            Geometry::Polygon(square),
        ]);
        let multi = to_multipolygon(Geometry::GeometryCollection(collection)).unwrap();
        assert_eq!(multi.0.len(), 2);

        let err = to_multipolygon(Geometry::Point(Point::new(1.0, 2.0))).unwrap_err();
        assert!(matches!(err, Error::UnsupportedGeometry(name) if name == "Point"));
    }

    #[test]
    fn test_create_dataset_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let dest = root.join("config/data.yaml");
        let classes = BTreeMap::from([(0, "Treatment".to_string())]);

        create_dataset_yaml(&dest, root, &classes, false).unwrap();

        let yaml_content = fs::read_to_string(dest).unwrap();
        assert!(yaml_content.contains("path:"));
        assert!(yaml_content.contains("train: images/train"));
        assert!(yaml_content.contains("val: images/val"));
        assert!(yaml_content.contains("test:\n"));
        assert!(yaml_content.contains("0: Treatment"));
    }
}
