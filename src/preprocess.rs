//! Shapefile preprocessing: merge treatment polygons per NDVI image and attach
//! the metadata of the image each polygon belongs to.

use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry::{bbox_string, union_all};
use crate::io::load_shapefile;
use crate::raster::raster_dimensions;
use crate::table::{GeometryTable, Record};

pub const START_YEAR_COLUMN: &str = "start_year";
pub const END_YEAR_COLUMN: &str = "end_year";
pub const FILENAME_COLUMN: &str = "filename";
pub const PATH_COLUMN: &str = "path";
pub const WIDTH_COLUMN: &str = "width";
pub const HEIGHT_COLUMN: &str = "height";
pub const BBOX_COLUMN: &str = "bbox";

/// File name of the NDVI difference image of a subregion and year range
pub fn ndvi_filename(id: &str, start_year: i32, end_year: i32) -> String {
    let prefix = match id.chars().last() {
        Some(last) if last.is_ascii_digit() => format!("{}_", id),
        Some('E') => format!("{}_Expanded_", &id[..id.len() - 1]),
        _ => id.to_string(),
    };
    format!("{}{}to{}_NDVI_Difference.tif", prefix, start_year, end_year)
}

/// Parse a year attribute; shapefiles may store integers as reals
pub fn parse_year(value: &str) -> Result<i32> {
    let trimmed = value.trim();
    trimmed
        .parse::<i32>()
        .or_else(|_| trimmed.parse::<f64>().map(|year| year as i32))
        .map_err(|_| Error::InvalidArgument(format!("'{}' is not a year", value)))
}

/// Union the geometry of every group and emit one row per resulting polygon.
///
/// Attributes of the n-th polygon come from the n-th row of its group (the
/// last row when the union has more parts than the group has rows). Each row
/// gains a `bbox` column.
pub fn flatten_geometry(table: &GeometryTable, group_by: &[&str]) -> Result<GeometryTable> {
    for column in group_by {
        table.require_column(column)?;
    }

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Record>> = HashMap::new();
    for row in &table.rows {
        let key: Vec<String> = group_by
            .iter()
            .map(|column| row.get(column).unwrap_or_default().to_string())
            .collect();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    let mut flattened = table.clone();
    flattened.rows.clear();
    flattened.add_column(BBOX_COLUMN);

    for key in &order {
        let Some(group) = groups.get(key) else { continue };
        let merged = union_all(group.iter().filter_map(|row| row.geometry.as_ref()));
        for (i, polygon) in merged.0.into_iter().enumerate() {
            let source = group[i.min(group.len() - 1)];
            let mut record = Record::new(None);
            record.fields = source.fields.clone();
            record.set(BBOX_COLUMN, bbox_string(&polygon));
            record.geometry = Some(geo::MultiPolygon::new(vec![polygon]));
            flattened.rows.push(record);
        }
    }

    debug!(
        "Flattened {} rows in {} groups into {} polygons",
        table.len(),
        order.len(),
        flattened.len()
    );
    Ok(flattened)
}

/// Attach the NDVI image metadata to every row; rows without an image are dropped
pub fn map_metadata(
    table: &GeometryTable,
    id_column: &str,
    start_year_col: &str,
    end_year_col: &str,
    img_dir: &Path,
) -> Result<GeometryTable> {
    for column in [id_column, start_year_col, end_year_col] {
        table.require_column(column)?;
    }
    let img_dir = fs::canonicalize(img_dir).unwrap_or_else(|_| img_dir.to_path_buf());

    let columns = vec![
        id_column.to_string(),
        START_YEAR_COLUMN.to_string(),
        END_YEAR_COLUMN.to_string(),
        FILENAME_COLUMN.to_string(),
        PATH_COLUMN.to_string(),
        WIDTH_COLUMN.to_string(),
        HEIGHT_COLUMN.to_string(),
        BBOX_COLUMN.to_string(),
    ];
    let mut mapped = GeometryTable::new(columns, table.crs.clone());

    let mut sizes: HashMap<PathBuf, Option<(usize, usize)>> = HashMap::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();

    for row in &table.rows {
        let id = row.get(id_column).unwrap_or_default();
        let start_year = parse_year(row.get(start_year_col).unwrap_or_default())?;
        let end_year = parse_year(row.get(end_year_col).unwrap_or_default())?;
        let filename = ndvi_filename(id, start_year, end_year);
        let path = img_dir.join(&filename);

        let size = *sizes.entry(path.clone()).or_insert_with(|| {
            if !path.exists() {
                return None;
            }
            match raster_dimensions(&path) {
                Ok(size) => Some(size),
                Err(e) => {
                    log::error!("Failed to read {}: {}", path.display(), e);
                    None
                }
            }
        });
        let Some((width, height)) = size else {
            missing.insert(filename);
            continue;
        };

        let mut record = Record::new(row.geometry.clone())
            .with_field(id_column, id)
            .with_field(START_YEAR_COLUMN, start_year.to_string())
            .with_field(END_YEAR_COLUMN, end_year.to_string())
            .with_field(FILENAME_COLUMN, filename)
            .with_field(PATH_COLUMN, path.to_string_lossy())
            .with_field(WIDTH_COLUMN, width.to_string())
            .with_field(HEIGHT_COLUMN, height.to_string());
        record.set(BBOX_COLUMN, row.get(BBOX_COLUMN).unwrap_or_default());
        mapped.rows.push(record);
    }

    if !missing.is_empty() {
        warn!(
            "Dropped rows referencing {} missing NDVI images in {}",
            missing.len(),
            img_dir.display()
        );
        for filename in &missing {
            debug!("Missing NDVI image: {}", filename);
        }
    }
    Ok(mapped)
}

/// Load a shapefile, flatten its geometry per image and year range, and map
/// each polygon to its NDVI image
pub fn preprocess_shapefile(
    path: &Path,
    id_column: &str,
    start_year_col: &str,
    end_year_col: &str,
    img_dir: &Path,
) -> Result<GeometryTable> {
    let table = load_shapefile(path)?;
    let crs = table.crs.clone();

    let mut flattened = flatten_geometry(&table, &[id_column, start_year_col, end_year_col])?;
    flattened.drop_duplicates();
    let mut mapped = map_metadata(&flattened, id_column, start_year_col, end_year_col, img_dir)?;
    mapped.drop_duplicates();
    mapped.crs = crs;

    info!(
        "Preprocessed {} rows into {} polygons with NDVI images",
        table.len(),
        mapped.len()
    );
    Ok(mapped)
}
