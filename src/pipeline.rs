//! The fixed run sequence: paths, directories, load and filter, persist,
//! dataset generation and summary.

use log::info;
use std::path::{Path, PathBuf};

use crate::config::{Args, DatasetConfig, RunParams};
use crate::error::{Error, Result};
use crate::io::{save_as_csv, save_as_shp};
use crate::paths::{build_path_table, materialize_directories, PathTable};
use crate::preprocess::preprocess_shapefile;
use crate::table::GeometryTable;
use crate::yolo::YoloDataset;
use crate::yolo_dataset::{ndvi_to_yolo_dataset, DatasetPaths};

pub use crate::filter::load_and_filter;

/// Save the table as CSV and shapefile, replacing earlier outputs
pub fn persist(table: &GeometryTable, csv_path: &Path, shp_path: &Path) -> Result<()> {
    save_as_csv(table, csv_path, true)?;
    save_as_shp(table, shp_path, true)?;
    info!(
        "Saved {} rows to {} and {}",
        table.len(),
        csv_path.display(),
        shp_path.display()
    );
    Ok(())
}

/// Preprocess a shapefile; `year_columns` names the start and end year attributes
pub fn preprocess(
    shapefile_path: &Path,
    id_column: &str,
    image_dir: &Path,
    year_columns: (&str, &str),
) -> Result<GeometryTable> {
    let (start_year_col, end_year_col) = year_columns;
    preprocess_shapefile(shapefile_path, id_column, start_year_col, end_year_col, image_dir)
}

pub fn build_yolo_dataset(
    shapefile_path: &Path,
    ndvi_dir: &Path,
    output_dir: &Path,
    config: &DatasetConfig,
) -> Result<(YoloDataset, DatasetPaths)> {
    ndvi_to_yolo_dataset(shapefile_path, ndvi_dir, output_dir, config)
}

/// Report the dataset through the logger
pub fn summarize(dataset: &YoloDataset) {
    dataset.print_summary();
}

/// Run the whole pipeline for the given arguments
pub fn run(args: &Args) -> Result<()> {
    let root = PathBuf::from(&args.root_dir);
    if !root.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "root directory does not exist: {}",
            root.display()
        )));
    }

    let params = RunParams::from(args);
    let paths: PathTable = build_path_table(&root, &params);
    for (name, path) in paths.entries() {
        log::debug!("{:<20} {}", name, path.display());
    }
    materialize_directories(&paths)?;

    let table = load_and_filter(&paths.input_shapefile, &args.treatment_column, &args.treatment_code)?;
    persist(&table, &paths.csv_base, &paths.shp_base)?;

    let preprocessed = preprocess(
        &paths.shp_base,
        &args.id_column,
        &paths.ndvi,
        (&args.start_year_col, &args.end_year_col),
    )?;
    persist(&preprocessed, &paths.csv_preprocessed, &paths.shp_preprocessed)?;

    let config = DatasetConfig::from(args);
    let (dataset, dataset_paths) = build_yolo_dataset(&paths.shp_base, &paths.ndvi, &paths.model, &config)?;
    info!("Dataset config: {}", dataset_paths.config_yaml.display());
    summarize(&dataset);
    Ok(())
}
