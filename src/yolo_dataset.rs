use dashmap::DashMap;
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chips::{
    create_chips_from_geotiff, map_geometry_to_chips, remove_empty_geometry, translate_to_pixels, Chip,
};
use crate::classify::{classify, encode_classes, ClassLabel, CLASS_ID_COLUMN, CLASS_NAME_COLUMN};
use crate::config::DatasetConfig;
use crate::dataset::{copy_split_data, split_dataset, SplitOptions};
use crate::error::{Error, Result};
use crate::io::{save_as_csv, save_as_shp};
use crate::preprocess::{preprocess_shapefile, END_YEAR_COLUMN, FILENAME_COLUMN, PATH_COLUMN, START_YEAR_COLUMN};
use crate::raster::{process_geotiff_to_png_conversion, ConvertedImage};
use crate::table::GeometryTable;
use crate::types::{file_name, file_stem, OutputDirs, ProcessingStats};
use crate::utils::{clear_directory, create_output_directory};
use crate::yolo::YoloDataset;

/// Locations written while building a dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetPaths {
    pub output_dir: PathBuf,
    pub meta_dir: PathBuf,
    pub csv_dir: PathBuf,
    pub shp_dir: PathBuf,
    pub chips_dir: PathBuf,
    pub png_dir: PathBuf,
    pub labels_dir: PathBuf,
    pub config_yaml: PathBuf,
    pub yolo_csv: Option<PathBuf>,
}

impl DatasetPaths {
    fn new(shp_file: &Path, output_dir: &Path) -> Self {
        let meta_dir = output_dir.join("meta");
        let stem = file_stem(shp_file);
        Self {
            output_dir: output_dir.to_path_buf(),
            csv_dir: meta_dir.join("csv").join(&stem),
            shp_dir: meta_dir.join("shp").join(&stem),
            chips_dir: output_dir.join("images").join("chips"),
            png_dir: output_dir.join("images").join("png-chips"),
            labels_dir: output_dir.join("labels").join("generated"),
            config_yaml: output_dir.join("config").join("data.yaml"),
            yolo_csv: None,
            meta_dir,
        }
    }
}

// Persists the table of each stage under a growing file stem
struct StageWriter<'a> {
    paths: &'a DatasetPaths,
    config: &'a DatasetConfig,
    stem: String,
}

impl StageWriter<'_> {
    fn save(&mut self, suffix: &str, table: &GeometryTable) -> Result<()> {
        self.stem.push_str(suffix);
        if self.config.save_csv {
            let path = self.paths.csv_dir.join(format!("{}.csv", self.stem));
            save_as_csv(table, &path, self.config.exist_ok)?;
        }
        if self.config.save_shp {
            let path = self.paths.shp_dir.join(format!("{}.shp", self.stem));
            save_as_shp(table, &path, self.config.exist_ok)?;
        }
        Ok(())
    }

    /// Rename the stage suffix `from` to `to`, appending `to` when absent
    fn save_renamed(&mut self, from: &str, to: &str, table: &GeometryTable) -> Result<()> {
        if let Some(base) = self.stem.strip_suffix(from) {
            self.stem = base.to_string();
        }
        self.save(to, table)
    }
}

/// Set up the directory structure for the split output
pub fn setup_output_directories(output_dir: &Path, with_test: bool) -> std::io::Result<OutputDirs> {
    let output_dirs = OutputDirs::new(output_dir);
    create_output_directory(&output_dirs.train_labels_dir)?;
    create_output_directory(&output_dirs.val_labels_dir)?;
    create_output_directory(&output_dirs.train_images_dir)?;
    create_output_directory(&output_dirs.val_images_dir)?;
    if with_test {
        create_output_directory(&output_dirs.test_labels_dir)?;
        create_output_directory(&output_dirs.test_images_dir)?;
    }
    Ok(output_dirs)
}

fn matches_years(table: &GeometryTable, years: Option<(i32, i32)>) -> GeometryTable {
    let mut selected = table.clone();
    if let Some((start, end)) = years {
        let (start, end) = (start.to_string(), end.to_string());
        selected.retain(|row| {
            row.get(START_YEAR_COLUMN) == Some(start.as_str()) && row.get(END_YEAR_COLUMN) == Some(end.as_str())
        });
    }
    selected
}

/// Cut every referenced NDVI image into chips on the worker pool
fn create_chips(
    images: &[PathBuf],
    chips_dir: &Path,
    config: &DatasetConfig,
    pool: &rayon::ThreadPool,
) -> Result<Vec<Chip>> {
    let results: Vec<(PathBuf, Result<(Vec<Chip>, ProcessingStats)>)> = pool.install(|| {
        images
            .par_iter()
            .map(|image| {
                let output_dir = chips_dir.join(file_stem(image));
                let result = create_chips_from_geotiff(image, config.chip_size, &output_dir, config.exist_ok);
                (image.clone(), result)
            })
            .collect()
    });

    let mut chips = Vec::new();
    let mut stats = ProcessingStats::new();
    for (image, result) in results {
        match result {
            Ok((image_chips, image_stats)) => {
                chips.extend(image_chips);
                stats.merge(&image_stats);
            }
            Err(Error::FileExists(path)) => return Err(Error::FileExists(path)),
            Err(e) => {
                error!("Failed to chip {}: {}", image.display(), e);
                stats.total_images_processed += 1;
                stats.failed_images += 1;
            }
        }
    }
    stats.print_summary();
    Ok(chips)
}

// Point rows at the PNG rendered from their chip
fn remap_to_png(table: &mut GeometryTable, file_map: &DashMap<String, ConvertedImage>) {
    for row in table.rows.iter_mut() {
        let stem = row.get(FILENAME_COLUMN).map(|name| file_stem(Path::new(name)));
        let converted = stem.and_then(|stem| file_map.get(&stem).map(|entry| entry.png.clone()));
        if let Some(png) = converted {
            row.set(FILENAME_COLUMN, file_name(&png));
            row.set(PATH_COLUMN, png.to_string_lossy());
        }
    }
}

// Copy class columns from `encoded` onto the rows of `table` with the same index
fn copy_classes(table: &GeometryTable, encoded: &GeometryTable) -> Result<GeometryTable> {
    let mut copied = table.clone();
    for index in 0..copied.len().min(encoded.len()) {
        for column in [CLASS_ID_COLUMN, CLASS_NAME_COLUMN] {
            copied.set_value(index, column, encoded.value(index, column).unwrap_or_default())?;
        }
    }
    copied.insert_column(0, CLASS_ID_COLUMN);
    copied.insert_column(1, CLASS_NAME_COLUMN);
    Ok(copied)
}

/// Indices of the rows to keep: all labeled rows plus, when `background_bias`
/// is set, at most `labeled * bias` shuffled background rows
fn select_rows(encoded: &GeometryTable, background_bias: Option<f32>, seed: u64) -> Vec<usize> {
    let background_code = ClassLabel::Background.code();
    let (mut background, labeled): (Vec<usize>, Vec<usize>) =
        (0..encoded.len()).partition(|&i| encoded.value(i, CLASS_ID_COLUMN) == Some(background_code));

    let mut keep = labeled;
    if let Some(bias) = background_bias {
        let mut rng = StdRng::seed_from_u64(seed);
        background.shuffle(&mut rng);
        background.truncate((keep.len() as f32 * bias) as usize);
        keep.extend(background);
    }
    keep
}

fn take_rows(table: &GeometryTable, indices: &[usize]) -> GeometryTable {
    let mut selected = table.clone();
    selected.rows = indices.iter().filter_map(|&i| table.rows.get(i).cloned()).collect();
    selected
}

/// Build a YOLO dataset from a treatment shapefile and a directory of NDVI
/// difference GeoTIFFs.
///
/// Stages: preprocess the shapefile, chip the GeoTIFFs, map geometry onto the
/// chips, translate it to pixels, render PNGs, encode classes, then write
/// `config/data.yaml`, the label files and the train/val/test split under
/// `output_dir`.
pub fn ndvi_to_yolo_dataset(
    shp_file: &Path,
    ndvi_dir: &Path,
    output_dir: &Path,
    config: &DatasetConfig,
) -> Result<(YoloDataset, DatasetPaths)> {
    let ignore_empty_geom = config.ignore_empty_geom && config.background_bias.is_none();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_workers.unwrap_or(0))
        .build()
        .map_err(|e| Error::InvalidArgument(format!("cannot start worker pool: {}", e)))?;

    let mut paths = DatasetPaths::new(shp_file, output_dir);
    if output_dir.exists() && config.clean_dest {
        warn!("Clearing {}", output_dir.display());
        clear_directory(output_dir)?;
    } else {
        fs::create_dir_all(output_dir)?;
    }
    fs::create_dir_all(&paths.chips_dir)?;

    let mut stem = file_stem(shp_file);
    if let Some((start, end)) = config.years {
        stem.push_str(&format!("_{}to{}", start, end));
    }
    let mut stage = StageWriter {
        paths: &paths,
        config,
        stem,
    };

    info!("Preprocessing {}", shp_file.display());
    let table = preprocess_shapefile(
        shp_file,
        &config.id_column,
        &config.start_year_col,
        &config.end_year_col,
        ndvi_dir,
    )?;
    stage.save("", &table)?;

    let table = matches_years(&table, config.years);
    let images: Vec<PathBuf> = table.unique_values(PATH_COLUMN).into_iter().map(PathBuf::from).collect();
    if images.is_empty() {
        return Err(Error::NoImages(ndvi_dir.to_path_buf()));
    }

    info!("Creating chips from {} GeoTIFFs", images.len());
    let chips = create_chips(&images, &paths.chips_dir, config, &pool)?;

    let mut mapped = map_geometry_to_chips(&table, &chips);
    if ignore_empty_geom {
        let removed = remove_empty_geometry(&mut mapped)?;
        info!("Removed {} chips without treatment geometry", removed);
    }
    stage.save("_chips_xy", &mapped)?;

    // labels are always written in chip pixel space
    let mut pixels = translate_to_pixels(&mapped, &chips);
    if config.xy_to_index {
        mapped = pixels.clone();
        stage.save_renamed("_xy", "_indexed", &mapped)?;
    }

    if config.tif_to_png {
        info!("Converting chips to PNG");
        let file_map = pool.install(|| process_geotiff_to_png_conversion(&paths.chips_dir, &paths.png_dir, true))?;
        remap_to_png(&mut mapped, &file_map);
        remap_to_png(&mut pixels, &file_map);
        stage.save("_as_png", &mapped)?;
    }

    let encoded_pixels = encode_classes(&pixels, classify);
    let encoded = if config.xy_to_index {
        encoded_pixels.clone()
    } else {
        copy_classes(&mapped, &encoded_pixels)?
    };
    let keep = select_rows(&encoded_pixels, if ignore_empty_geom { None } else { config.background_bias }, config.seed);
    let encoded = take_rows(&encoded, &keep);
    let encoded_pixels = take_rows(&encoded_pixels, &keep);
    stage.save("_encoded", &encoded)?;

    if encoded.len() < config.min_labels_required {
        return Err(Error::InsufficientLabels {
            found: encoded.len(),
            required: config.min_labels_required,
        });
    }

    info!("Creating YOLO dataset with {} labels", encoded.len());
    let mut yolo_ds = YoloDataset::from_table(&encoded_pixels, config.format)?;
    let config_dir = output_dir.join("config");
    fs::create_dir_all(&config_dir)?;
    paths.config_yaml = yolo_ds.generate_yaml_file(output_dir, &config_dir, config.test_size > 0.0)?;

    if config.generate_labels || config.generate_train_data {
        yolo_ds.generate_label_files(&paths.labels_dir, config.clean_dest, config.exist_ok)?;

        if config.generate_train_data {
            let images_dir = if config.tif_to_png {
                &paths.png_dir
            } else {
                &paths.chips_dir
            };
            let options = SplitOptions {
                split: config.split,
                test_size: config.test_size,
                mode: config.split_mode,
                shuffle: config.shuffle,
                seed: config.seed,
            };
            let split = split_dataset(images_dir, &paths.labels_dir, &options)?;
            let output_dirs = setup_output_directories(output_dir, !split.test.is_empty())?;
            copy_split_data(&split, &output_dirs);
            yolo_ds.set_split(split)?;
        }
    }

    if config.save_csv {
        let yolo_csv = paths.meta_dir.join("csv").join("yolo_ds.csv");
        yolo_ds.to_csv(&yolo_csv)?;
        paths.yolo_csv = Some(yolo_csv);
    }

    info!("Dataset written to {}", output_dir.display());
    Ok((yolo_ds, paths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;

    fn encoded(codes: &[&str]) -> GeometryTable {
        let mut table = GeometryTable::default();
        for (i, code) in codes.iter().enumerate() {
            table.push(
                Record::new(None)
                    .with_field(CLASS_ID_COLUMN, *code)
                    .with_field(FILENAME_COLUMN, format!("chip_{}.tif", i)),
            );
        }
        table
    }

    #[test]
    fn test_select_rows_drops_background_without_bias() {
        let table = encoded(&["0", "-1", "0", "-1"]);
        assert_eq!(select_rows(&table, None, 42), vec![0, 2]);
    }

    #[test]
    fn test_select_rows_caps_background() {
        let table = encoded(&["0", "0", "-1", "-1", "-1", "-1"]);
        let keep = select_rows(&table, Some(0.5), 42);
        assert_eq!(keep.len(), 3);
        assert_eq!(&keep[..2], &[0, 1]);
        assert!(keep[2] >= 2);
    }

    #[test]
    fn test_stage_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let paths = DatasetPaths::new(Path::new("/data/treatments.shp"), temp_dir.path());
        let config = DatasetConfig {
            save_csv: true,
            ..Default::default()
        };
        let mut stage = StageWriter {
            paths: &paths,
            config: &config,
            stem: "treatments".to_string(),
        };
        let table = encoded(&["0"]);
        stage.save("_chips_xy", &table).unwrap();
        stage.save_renamed("_xy", "_indexed", &table).unwrap();
        stage.save("_as_png", &table).unwrap();

        assert!(paths.csv_dir.join("treatments_chips_xy.csv").exists());
        assert!(paths.csv_dir.join("treatments_chips_indexed.csv").exists());
        assert!(paths.csv_dir.join("treatments_chips_indexed_as_png.csv").exists());
    }

    #[test]
    fn test_remap_to_png() {
        let mut table = encoded(&["0"]);
        table.rows[0].set(PATH_COLUMN, "/chips/a/chip_0.tif");
        let file_map = DashMap::new();
        file_map.insert(
            "chip_0".to_string(),
            ConvertedImage {
                tif: PathBuf::from("/chips/a/chip_0.tif"),
                png: PathBuf::from("/png/a/chip_0.png"),
            },
        );
        remap_to_png(&mut table, &file_map);
        assert_eq!(table.rows[0].get(FILENAME_COLUMN), Some("chip_0.png"));
        assert_eq!(table.rows[0].get(PATH_COLUMN), Some("/png/a/chip_0.png"));
    }

    #[test]
    fn test_copy_classes_onto_map_rows() {
        let mut mapped = GeometryTable::default();
        for name in ["chip_0.tif", "chip_1.tif"] {
            mapped.push(Record::new(None).with_field(FILENAME_COLUMN, name));
        }
        let mut pixels = encoded(&["0", "-1"]);
        pixels.rows[0].set(CLASS_NAME_COLUMN, "Treatment");
        pixels.rows[1].set(CLASS_NAME_COLUMN, "Background");

        let copied = copy_classes(&mapped, &pixels).unwrap();
        assert_eq!(copied.columns[0], CLASS_ID_COLUMN);
        assert_eq!(copied.columns[1], CLASS_NAME_COLUMN);
        assert_eq!(copied.value(0, CLASS_NAME_COLUMN), Some("Treatment"));
        assert_eq!(copied.value(1, CLASS_ID_COLUMN), Some("-1"));
        assert_eq!(copied.value(1, FILENAME_COLUMN), Some("chip_1.tif"));
    }

    #[test]
    fn test_setup_output_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dirs = setup_output_directories(temp_dir.path(), false).unwrap();
        assert!(dirs.train_images_dir.is_dir());
        assert!(dirs.val_labels_dir.is_dir());
        assert!(!dirs.test_images_dir.exists());
    }
}
