use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// Supported image formats
pub const IMG_FORMATS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg", "bmp", "webp"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// True when the path has one of the supported image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

// Normalized YOLO bounding box: center, width and height
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    /// Bounding box of flat `x y x y ...` coordinates
    pub fn from_segments(points: &[f64]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let (x_min, y_min, x_max, y_max) = points.chunks_exact(2).fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(x_min, y_min, x_max, y_max), xy| {
                (x_min.min(xy[0]), y_min.min(xy[1]), x_max.max(xy[0]), y_max.max(xy[1]))
            },
        );
        Some(Self {
            x: (x_min + x_max) / 2.0,
            y: (y_min + y_max) / 2.0,
            width: x_max - x_min,
            height: y_max - y_min,
        })
    }
}

// An image that belongs to the dataset
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ImageData {
    pub filename: String,
    pub basename: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    pub fn new(path: &Path, width: u32, height: u32) -> Self {
        Self {
            filename: file_name(path),
            basename: file_stem(path),
            path: path.to_path_buf(),
            width,
            height,
        }
    }
}

// A polygon of one class in the pixel space of its chip
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Shape {
    pub class_id: u32,
    pub class_name: String,
    pub points: Vec<(f64, f64)>,
}

// The shapes annotated on one chip image; no shapes means a background image
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageAnnotation {
    pub image: ImageData,
    pub shapes: Vec<Shape>,
}

impl ImageAnnotation {
    pub fn is_background(&self) -> bool {
        self.shapes.is_empty()
    }
}

// One annotation of an image; background images carry a single label without class
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnnotatedLabel {
    pub class_id: Option<u32>,
    pub class_name: String,
    pub bbox: Option<BBox>,
    pub segments: Vec<f64>,
    pub image_filename: String,
    pub filepath: Option<PathBuf>,
}

impl AnnotatedLabel {
    /// Parse one YOLO label line (`class x y w h` or `class x1 y1 x2 y2 ...`)
    pub fn parse_label(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let class_id = parts.next()?.parse::<u32>().ok()?;
        let points: Vec<f64> = parts.map(str::parse).collect::<Result<_, _>>().ok()?;
        let (bbox, segments) = if points.len() > 4 {
            (BBox::from_segments(&points), points)
        } else if points.len() == 4 {
            let bbox = BBox {
                x: points[0],
                y: points[1],
                width: points[2],
                height: points[3],
            };
            (Some(bbox), Vec::new())
        } else {
            return None;
        };
        Some(Self {
            class_id: Some(class_id),
            class_name: String::new(),
            bbox,
            segments,
            image_filename: String::new(),
            filepath: None,
        })
    }

    /// Read every label of a label file; an empty file yields one background label
    pub fn from_file(path: &Path, image_filename: &str) -> std::io::Result<Vec<Self>> {
        let content = fs::read_to_string(path)?;
        let mut labels: Vec<Self> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(Self::parse_label)
            .collect();
        if labels.is_empty() {
            labels.push(Self {
                class_id: None,
                class_name: String::new(),
                bbox: None,
                segments: Vec::new(),
                image_filename: String::new(),
                filepath: None,
            });
        }
        for label in labels.iter_mut() {
            label.image_filename = image_filename.to_string();
            label.filepath = Some(path.to_path_buf());
        }
        Ok(labels)
    }

    pub fn is_background(&self) -> bool {
        self.class_id.is_none()
    }
}

// An image and its label file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLabelPair {
    pub image: PathBuf,
    pub label: PathBuf,
}

// Struct to hold the paths to the output directories for train/val/test splits
#[derive(Debug, Clone)]
pub struct OutputDirs {
    pub train_labels_dir: PathBuf,
    pub val_labels_dir: PathBuf,
    pub train_images_dir: PathBuf,
    pub val_images_dir: PathBuf,
    pub test_labels_dir: PathBuf,
    pub test_images_dir: PathBuf,
}

impl OutputDirs {
    pub fn new(dataset_root: &Path) -> Self {
        let images = dataset_root.join("images");
        let labels = dataset_root.join("labels");
        Self {
            train_labels_dir: labels.join("train"),
            val_labels_dir: labels.join("val"),
            train_images_dir: images.join("train"),
            val_images_dir: images.join("val"),
            test_labels_dir: labels.join("test"),
            test_images_dir: images.join("test"),
        }
    }
}

// Struct to hold the split datasets for training, validation, and testing
#[derive(Debug, Clone, Default)]
pub struct SplitData {
    pub train: Vec<ImageLabelPair>,
    pub val: Vec<ImageLabelPair>,
    pub test: Vec<ImageLabelPair>,
}

impl SplitData {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Struct to hold chipping statistics
#[derive(Debug, Default, Clone)]
pub struct ProcessingStats {
    pub total_images_processed: usize,
    pub chips_written: usize,
    pub chips_skipped: usize,
    pub failed_images: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: &ProcessingStats) {
        self.total_images_processed += other.total_images_processed;
        self.chips_written += other.chips_written;
        self.chips_skipped += other.chips_skipped;
        self.failed_images += other.failed_images;
    }

    pub fn print_summary(&self) {
        log::info!("=== Chipping Summary ===");
        log::info!("Total GeoTIFFs processed: {}", self.total_images_processed);
        log::info!("Chips written: {}", self.chips_written);
        log::info!("Chips skipped (no usable data): {}", self.chips_skipped);
        if self.failed_images > 0 {
            log::warn!("GeoTIFFs that failed to chip: {}", self.failed_images);
        }
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
