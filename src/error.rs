use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building an NDVI YOLO dataset
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("file already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("unsupported geometry type: {0}")]
    UnsupportedGeometry(String),

    #[error("could not find any images in {}", .0.display())]
    NoImages(PathBuf),

    #[error(
        "number of labels is less than the minimum required: got {found} when at least {required} are required"
    )]
    InsufficientLabels { found: usize, required: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
