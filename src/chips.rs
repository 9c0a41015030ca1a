use geo::{MultiPolygon, Polygon};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::geometry::{clip_to, geometry_to_pixels, GeoTransform, Window};
use crate::preprocess::{
    END_YEAR_COLUMN, FILENAME_COLUMN, HEIGHT_COLUMN, PATH_COLUMN, START_YEAR_COLUMN, WIDTH_COLUMN,
};
use crate::raster::{write_geotiff, Raster};
use crate::table::{GeometryTable, Record};
use crate::types::{file_name, file_stem, ProcessingStats};
use crate::utils::remove_empty_parents;

// Chips whose short side is less than this fraction of the long side are dropped
const MIN_ASPECT_RATIO: f64 = 0.1;

/// A georeferenced tile cut from a larger GeoTIFF
#[derive(Debug, Clone, PartialEq)]
pub struct Chip {
    pub path: PathBuf,
    pub source: PathBuf,
    pub window: Window,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

impl Chip {
    /// Footprint of the chip in map coordinates
    pub fn footprint(&self) -> Polygon<f64> {
        self.transform.footprint(self.width, self.height)
    }
}

/// Row-major tiling of a raster; edge windows are clipped to the raster.
/// Without a chip size the whole raster is a single window.
pub fn chip_windows(width: usize, height: usize, chip_size: Option<u32>) -> Vec<Window> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let Some(size) = chip_size.map(|size| size as usize).filter(|&size| size > 0) else {
        return vec![Window::new(0, 0, width, height)];
    };

    let mut windows = Vec::new();
    for row in (0..height).step_by(size) {
        for col in (0..width).step_by(size) {
            windows.push(Window::new(
                col,
                row,
                size.min(width - col),
                size.min(height - row),
            ));
        }
    }
    windows
}

/// Whether a chip carries usable data.
///
/// `data` is row-major with nodata already replaced by NaN.
pub fn is_informative(data: &[f64], width: usize, height: usize, nodata: Option<f64>) -> bool {
    if width == 0 || height == 0 || data.is_empty() {
        return false;
    }
    let max = data
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))));
    let Some(max) = max else {
        return false;
    };
    if max == 0.0 || Some(max) == nodata {
        return false;
    }
    let (short, long) = (width.min(height) as f64, width.max(height) as f64);
    short / long >= MIN_ASPECT_RATIO
}

/// File name of the chip at a pixel offset of its source image
pub fn chip_name(stem: &str, row: usize, col: usize) -> String {
    format!("{}_chip_{}_{}.tif", stem, row, col)
}

/// Cut a GeoTIFF into chips written to `output_dir`
pub fn create_chips_from_geotiff(
    path: &Path,
    chip_size: Option<u32>,
    output_dir: &Path,
    exist_ok: bool,
) -> Result<(Vec<Chip>, ProcessingStats)> {
    let raster = Raster::open(path)?;
    let stem = file_stem(path);
    let mut stats = ProcessingStats {
        total_images_processed: 1,
        ..Default::default()
    };
    let mut chips = Vec::new();

    for window in chip_windows(raster.width, raster.height, chip_size) {
        let chip_path = output_dir.join(chip_name(&stem, window.row_off, window.col_off));
        if chip_path.exists() && !exist_ok {
            return Err(Error::FileExists(chip_path));
        }

        let data = raster.read_window(&window)?;
        if !is_informative(&data, window.width, window.height, raster.nodata) {
            stats.chips_skipped += 1;
            continue;
        }

        let transform = raster.transform.window_transform(&window);
        write_geotiff(
            &chip_path,
            &data,
            window.width,
            window.height,
            &transform,
            raster.srs.as_deref(),
            raster.nodata,
        )?;
        stats.chips_written += 1;
        chips.push(Chip {
            path: chip_path,
            source: path.to_path_buf(),
            window,
            transform,
            width: window.width,
            height: window.height,
        });
    }

    debug!(
        "{}: {} chips written, {} skipped",
        path.display(),
        stats.chips_written,
        stats.chips_skipped
    );
    Ok((chips, stats))
}

fn chip_record(chip: &Chip, source: &Record, geometry: MultiPolygon<f64>) -> Record {
    Record::new(Some(geometry))
        .with_field(START_YEAR_COLUMN, source.get(START_YEAR_COLUMN).unwrap_or_default())
        .with_field(END_YEAR_COLUMN, source.get(END_YEAR_COLUMN).unwrap_or_default())
        .with_field(FILENAME_COLUMN, file_name(&chip.path))
        .with_field(PATH_COLUMN, chip.path.to_string_lossy())
        .with_field(WIDTH_COLUMN, chip.width.to_string())
        .with_field(HEIGHT_COLUMN, chip.height.to_string())
}

/// Intersect the polygons of each chip's source image with the chip.
///
/// Every polygon of the intersection becomes a row describing the chip. A
/// chip that intersects nothing yields a single row with empty geometry.
pub fn map_geometry_to_chips(table: &GeometryTable, chips: &[Chip]) -> GeometryTable {
    let columns = [
        START_YEAR_COLUMN,
        END_YEAR_COLUMN,
        FILENAME_COLUMN,
        PATH_COLUMN,
        WIDTH_COLUMN,
        HEIGHT_COLUMN,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    let mut mapped = GeometryTable::new(columns, table.crs.clone());

    let mut by_source: HashMap<PathBuf, Vec<&Record>> = HashMap::new();
    for row in &table.rows {
        if let Some(path) = row.get(PATH_COLUMN) {
            by_source.entry(PathBuf::from(path)).or_default().push(row);
        }
    }

    for chip in chips {
        let Some(sources) = by_source.get(&chip.source) else {
            continue;
        };
        let footprint = chip.footprint();
        let before = mapped.len();
        for source in sources {
            let Some(geometry) = source.geometry.as_ref().filter(|g| !g.0.is_empty()) else {
                continue;
            };
            for polygon in clip_to(geometry, &footprint).0 {
                mapped.rows.push(chip_record(chip, source, MultiPolygon::new(vec![polygon])));
            }
        }
        if mapped.len() == before {
            mapped.rows.push(chip_record(chip, sources[0], MultiPolygon::new(vec![])));
        }
    }

    mapped.drop_duplicates();
    mapped.rows.sort_by(|a, b| {
        (a.get(START_YEAR_COLUMN), a.get(END_YEAR_COLUMN))
            .cmp(&(b.get(START_YEAR_COLUMN), b.get(END_YEAR_COLUMN)))
    });
    mapped
}

/// Drop rows with empty geometry and delete the chips only they referenced.
///
/// Returns the number of chips deleted.
pub fn remove_empty_geometry(table: &mut GeometryTable) -> Result<usize> {
    let unused: HashSet<String> = table
        .rows
        .iter()
        .filter(|row| row.is_empty_geometry())
        .filter_map(|row| row.get(PATH_COLUMN).map(str::to_string))
        .collect();
    table.retain(|row| !row.is_empty_geometry());
    let still_used: HashSet<&str> = table.rows.iter().filter_map(|row| row.get(PATH_COLUMN)).collect();

    let mut removed = 0;
    for path in unused.iter().filter(|path| !still_used.contains(path.as_str())) {
        let path = Path::new(path);
        if path.exists() {
            fs::remove_file(path)?;
            removed += 1;
        }
        remove_empty_parents(path)?;
    }
    debug!("Removed {} chips without geometry", removed);
    Ok(removed)
}

/// Convert the geometry of every row into the pixel space of its chip
pub fn translate_to_pixels(table: &GeometryTable, chips: &[Chip]) -> GeometryTable {
    let by_path: HashMap<String, &Chip> = chips
        .iter()
        .map(|chip| (chip.path.to_string_lossy().into_owned(), chip))
        .collect();

    let mut translated = table.clone();
    for row in translated.rows.iter_mut() {
        let chip = row.get(PATH_COLUMN).and_then(|path| by_path.get(path)).copied();
        if let (Some(chip), Some(geometry)) = (chip, row.geometry.as_ref()) {
            if let Some(pixels) = geometry_to_pixels(geometry, &chip.transform, chip.width, chip.height) {
                row.geometry = Some(pixels);
            }
        }
    }
    translated
}
