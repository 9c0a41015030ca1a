//! NDVI difference GeoTIFFs to YOLO dataset converter
//!
//! This library turns a shapefile of vegetation treatment polygons and a
//! directory of NDVI difference rasters into a YOLO training dataset: chips,
//! PNG images, label files, a train/val/test split and `data.yaml`.

pub mod chips;
pub mod classify;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod preprocess;
pub mod raster;
pub mod table;
pub mod types;
pub mod utils;
pub mod yolo;
pub mod yolo_dataset;

// Re-export commonly used types and functions
pub use classify::{classify, encode_classes, ClassLabel};
pub use config::{Args, DatasetConfig, Format, RunParams, SplitMode};
pub use error::{Error, Result};
pub use io::{load_shapefile, save_as_csv, save_as_shp};
pub use paths::{build_path_table, materialize_directories, PathTable};
pub use pipeline::run;
pub use table::{GeometryTable, Record};
pub use yolo::{DatasetSummary, YoloDataset};
pub use yolo_dataset::{ndvi_to_yolo_dataset, DatasetPaths};
