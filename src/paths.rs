//! Directory and file layout of a run.
//!
//! Every location a run reads or writes is derived here from the root
//! directory and the run parameters, so the rest of the pipeline never
//! assembles paths by hand.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::RunParams;
use crate::error::Result;

/// Named filesystem locations for one run
#[derive(Debug, Clone, PartialEq)]
pub struct PathTable {
    pub root: PathBuf,
    pub datasets: PathBuf,
    pub ndvi: PathBuf,
    pub shape_files: PathBuf,
    pub input_shapefile: PathBuf,
    pub meta: PathBuf,
    pub meta_csv: PathBuf,
    pub meta_shp: PathBuf,
    pub csv_base: PathBuf,
    pub shp_base: PathBuf,
    pub csv_preprocessed: PathBuf,
    pub shp_preprocessed: PathBuf,
    pub models: PathBuf,
    pub model: PathBuf,
    pub images_train: PathBuf,
    pub images_val: PathBuf,
    pub images_test: PathBuf,
    pub labels_train: PathBuf,
    pub labels_val: PathBuf,
    pub labels_test: PathBuf,
    pub config_dir: PathBuf,
    pub config_yaml: PathBuf,
}

/// Name of the model directory for the given parameters
pub fn model_dir_name(params: &RunParams) -> String {
    let mut name = format!(
        "ndvi_{}px_{}to{}_{}",
        params.chip_size, params.start_year, params.end_year, params.split_mode
    );
    if params.pretrained {
        name.push_str("_pretrained");
    }
    name
}

// Stage file stem, e.g. base_all_years=2019to2022_utm10
fn stage_stem(stage: &str, params: &RunParams) -> String {
    format!(
        "{}_all_years={}to{}_utm{}",
        stage, params.start_year, params.end_year, params.utm_zone
    )
}

/// Build the path table for a run; performs no I/O
pub fn build_path_table(root: &Path, params: &RunParams) -> PathTable {
    let root = root.to_path_buf();
    let datasets = root.join("datasets");
    let ndvi = datasets.join("ndvi");
    let shape_files = datasets.join("shapefiles");
    let input_shapefile = shape_files.join(&params.shapefile);
    let meta = datasets.join("meta");
    let meta_csv = meta.join("csv");
    let meta_shp = meta.join("shp");

    let base = stage_stem("base", params);
    let preprocessed = stage_stem("preprocessed", params);

    let models = root.join("models").join("yolo");
    let model = models.join(model_dir_name(params));
    let images = model.join("images");
    let labels = model.join("labels");
    let config_dir = model.join("config");

    PathTable {
        csv_base: meta_csv.join(format!("{base}.csv")),
        shp_base: meta_shp.join(&base).join(format!("{base}.shp")),
        csv_preprocessed: meta_csv.join(format!("{preprocessed}.csv")),
        shp_preprocessed: meta_shp
            .join(&preprocessed)
            .join(format!("{preprocessed}.shp")),
        images_train: images.join("train"),
        images_val: images.join("val"),
        images_test: images.join("test"),
        labels_train: labels.join("train"),
        labels_val: labels.join("val"),
        labels_test: labels.join("test"),
        config_yaml: config_dir.join("data.yaml"),
        config_dir,
        root,
        datasets,
        ndvi,
        shape_files,
        input_shapefile,
        meta,
        meta_csv,
        meta_shp,
        models,
        model,
    }
}

impl PathTable {
    /// Symbolic name and path of every entry
    pub fn entries(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("ROOT", self.root.as_path()),
            ("DATASETS", self.datasets.as_path()),
            ("NDVI", self.ndvi.as_path()),
            ("SHAPE_FILES", self.shape_files.as_path()),
            ("SHPZ10_INPUT", self.input_shapefile.as_path()),
            ("META", self.meta.as_path()),
            ("META_CSV", self.meta_csv.as_path()),
            ("META_SHP", self.meta_shp.as_path()),
            ("CSVZ10", self.csv_base.as_path()),
            ("SHPZ10", self.shp_base.as_path()),
            ("CSVZ10_PREPROCESSED", self.csv_preprocessed.as_path()),
            ("SHPZ10_PREPROCESSED", self.shp_preprocessed.as_path()),
            ("MODELS", self.models.as_path()),
            ("MODEL", self.model.as_path()),
            ("IMAGES_TRAIN", self.images_train.as_path()),
            ("IMAGES_VAL", self.images_val.as_path()),
            ("IMAGES_TEST", self.images_test.as_path()),
            ("LABELS_TRAIN", self.labels_train.as_path()),
            ("LABELS_VAL", self.labels_val.as_path()),
            ("LABELS_TEST", self.labels_test.as_path()),
            ("CONFIG", self.config_dir.as_path()),
            ("CONFIG_YAML", self.config_yaml.as_path()),
        ]
    }

    /// Entries that name directories (no file extension)
    pub fn directories(&self) -> Vec<&Path> {
        self.entries()
            .into_iter()
            .map(|(_, path)| path)
            .filter(|path| path.extension().is_none())
            .collect()
    }
}

/// Create every directory entry of the table, leaving existing ones untouched
pub fn materialize_directories(table: &PathTable) -> Result<()> {
    for dir in table.directories() {
        if !dir.exists() {
            debug!("Creating directory {}", dir.display());
        }
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
