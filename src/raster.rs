use dashmap::DashMap;
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use image::RgbImage;
use log::{error, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::geometry::{GeoTransform, Window};
use crate::types::file_stem;
use crate::utils::{clear_directory, collect_files_with_suffix, create_progress_bar};

/// Single-band GeoTIFF opened for reading
pub struct Raster {
    dataset: Dataset,
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    /// Spatial reference as WKT
    pub srs: Option<String>,
}

impl Raster {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let transform = GeoTransform(dataset.geo_transform()?);
        let nodata = dataset.rasterband(1)?.no_data_value();
        let srs = dataset.spatial_ref().ok().and_then(|srs| srs.to_wkt().ok());
        Ok(Self {
            dataset,
            path: path.to_path_buf(),
            width,
            height,
            transform,
            nodata,
            srs,
        })
    }

    /// Read band 1 inside the window, row-major, with nodata replaced by NaN
    pub fn read_window(&self, window: &Window) -> Result<Vec<f64>> {
        let band = self.dataset.rasterband(1)?;
        let size = (window.width, window.height);
        let mut data = vec![0.0f64; window.width * window.height];
        band.read_into_slice::<f64>(
            (window.col_off as isize, window.row_off as isize),
            size,
            size,
            &mut data,
            None,
        )?;
        if let Some(nodata) = self.nodata {
            for value in data.iter_mut() {
                if *value == nodata {
                    *value = f64::NAN;
                }
            }
        }
        Ok(data)
    }

    pub fn read_all(&self) -> Result<Vec<f64>> {
        self.read_window(&Window::new(0, 0, self.width, self.height))
    }
}

/// Width and height of a raster without reading pixel data
pub fn raster_dimensions(path: &Path) -> Result<(usize, usize)> {
    Ok(Dataset::open(path)?.raster_size())
}

/// Write a single-band float GeoTIFF; NaN cells are stored as `nodata` when given
pub fn write_geotiff(
    path: &Path,
    data: &[f64],
    width: usize,
    height: usize,
    transform: &GeoTransform,
    srs: Option<&str>,
    nodata: Option<f64>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<f32, _>(path, width, height, 1)?;
    dataset.set_geo_transform(&transform.0)?;
    if let Some(wkt) = srs {
        dataset.set_spatial_ref(&SpatialRef::from_wkt(wkt)?)?;
    }

    let values: Vec<f32> = data
        .iter()
        .map(|&v| match nodata {
            Some(nodata) if v.is_nan() => nodata as f32,
            _ => v as f32,
        })
        .collect();
    let mut band = dataset.rasterband(1)?;
    if nodata.is_some() {
        band.set_no_data_value(nodata)?;
    }
    let mut buffer = Buffer::new((width, height), values);
    band.write((0, 0), (width, height), &mut buffer)?;
    Ok(())
}

/// Stretch valid values linearly to 0..=255 and replicate them into RGB.
///
/// NaN cells and cells equal to `nodata` become black. A chip without valid
/// data, or with a single distinct value, is all black.
pub fn normalize_to_rgb(data: &[f64], nodata: Option<f64>) -> Vec<u8> {
    let is_valid = |v: f64| !v.is_nan() && Some(v) != nodata;
    let (min, max) = data
        .iter()
        .copied()
        .filter(|&v| is_valid(v))
        .fold((f64::MAX, f64::MIN), |(min, max), v| (min.min(v), max.max(v)));
    let range = max - min;

    let mut rgb = Vec::with_capacity(data.len() * 3);
    for &value in data {
        let level = if is_valid(value) && range > 0.0 {
            (((value - min) / range).clamp(0.0, 1.0) * 255.0) as u8
        } else {
            0
        };
        rgb.extend_from_slice(&[level, level, level]);
    }
    rgb
}

/// Render band 1 of a GeoTIFF as an 8-bit RGB PNG
pub fn tiff_to_png(src: &Path, dest: &Path) -> Result<()> {
    let raster = Raster::open(src)?;
    let data = raster.read_all()?;
    let rgb = normalize_to_rgb(&data, raster.nodata);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let image = RgbImage::from_raw(raster.width as u32, raster.height as u32, rgb)
        .ok_or_else(|| {
            crate::error::Error::InvalidArgument(format!(
                "raster {} has inconsistent dimensions",
                src.display()
            ))
        })?;
    image.save(dest)?;
    Ok(())
}

/// A GeoTIFF chip and the PNG rendered from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedImage {
    pub tif: PathBuf,
    pub png: PathBuf,
}

/// Render every GeoTIFF below `src_dir` as PNG below `dest_dir`, keeping the
/// relative layout. Returns the conversions keyed by file stem; files that
/// fail to convert are logged and left out.
pub fn process_geotiff_to_png_conversion(
    src_dir: &Path,
    dest_dir: &Path,
    clear_dir: bool,
) -> Result<DashMap<String, ConvertedImage>> {
    let src_paths = collect_files_with_suffix(src_dir, "tif", true);
    if clear_dir {
        clear_directory(dest_dir)?;
    } else {
        fs::create_dir_all(dest_dir)?;
    }

    let file_map = DashMap::new();
    let pb = create_progress_bar(src_paths.len() as u64, "PNG");
    src_paths.par_iter().for_each(|path| {
        let relative = path.strip_prefix(src_dir).unwrap_or(path);
        let dest_path = dest_dir.join(relative).with_extension("png");
        match tiff_to_png(path, &dest_path) {
            Ok(()) => {
                file_map.insert(
                    file_stem(path),
                    ConvertedImage {
                        tif: path.clone(),
                        png: dest_path,
                    },
                );
            }
            Err(e) => error!("Failed to convert {} to PNG: {}", path.display(), e),
        }
        pb.inc(1);
    });
    pb.finish_with_message("PNG conversion complete");

    info!(
        "Converted {} of {} GeoTIFFs to PNG in {}",
        file_map.len(),
        src_paths.len(),
        dest_dir.display()
    );
    Ok(file_map)
}
