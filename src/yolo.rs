//! YOLO dataset handle: classes, chip annotations and the optional split.

use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::classify::{CLASS_ID_COLUMN, CLASS_NAME_COLUMN};
use crate::config::Format;
use crate::conversion::write_label_files_in_parallel;
use crate::error::{Error, Result};
use crate::geometry::exterior_points;
use crate::io::create_dataset_yaml;
use crate::preprocess::{HEIGHT_COLUMN, PATH_COLUMN, WIDTH_COLUMN};
use crate::table::GeometryTable;
use crate::types::{AnnotatedLabel, ImageAnnotation, ImageData, Shape, SplitData};
use crate::utils::{clear_directory, create_progress_bar};

/// An annotated YOLO dataset built from a pixel-space geometry table
#[derive(Debug, Clone)]
pub struct YoloDataset {
    pub classes: BTreeMap<u32, String>,
    pub annotations: Vec<ImageAnnotation>,
    pub format: Format,
    pub split: Option<SplitData>,
    /// Labels read back from the split label files
    pub labels: Vec<AnnotatedLabel>,
}

/// Counts describing a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub classes: BTreeMap<u32, String>,
    pub images: usize,
    pub background_images: usize,
    pub labels: usize,
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== YOLO Dataset Summary ===")?;
        let names: Vec<String> = self
            .classes
            .iter()
            .map(|(id, name)| format!("{}: {}", id, name))
            .collect();
        writeln!(f, "Classes: {}", names.join(", "))?;
        writeln!(
            f,
            "Images: {} ({} background)",
            self.images, self.background_images
        )?;
        writeln!(f, "Labels: {}", self.labels)?;
        write!(
            f,
            "Split: {} train, {} val, {} test",
            self.train, self.val, self.test
        )
    }
}

#[derive(Serialize)]
struct LabelRow<'a> {
    filename: &'a str,
    path: String,
    width: u32,
    height: u32,
    class_id: Option<u32>,
    class_name: &'a str,
    bbox_x: Option<f64>,
    bbox_y: Option<f64>,
    bbox_width: Option<f64>,
    bbox_height: Option<f64>,
    segments: String,
}

fn parse_dimension(value: Option<&str>, column: &str) -> Result<u32> {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("row has no valid '{}'", column)))
}

impl YoloDataset {
    /// Build the dataset from an encoded table whose geometry is in chip pixels.
    ///
    /// Rows with a negative class id mark background chips.
    pub fn from_table(table: &GeometryTable, format: Format) -> Result<Self> {
        for column in [CLASS_ID_COLUMN, CLASS_NAME_COLUMN, PATH_COLUMN, WIDTH_COLUMN, HEIGHT_COLUMN] {
            table.require_column(column)?;
        }

        let mut classes = BTreeMap::new();
        let mut order: Vec<PathBuf> = Vec::new();
        let mut annotations: HashMap<PathBuf, ImageAnnotation> = HashMap::new();

        for row in &table.rows {
            let path = PathBuf::from(row.get(PATH_COLUMN).unwrap_or_default());
            if !annotations.contains_key(&path) {
                let width = parse_dimension(row.get(WIDTH_COLUMN), WIDTH_COLUMN)?;
                let height = parse_dimension(row.get(HEIGHT_COLUMN), HEIGHT_COLUMN)?;
                order.push(path.clone());
                annotations.insert(
                    path.clone(),
                    ImageAnnotation {
                        image: ImageData::new(&path, width, height),
                        shapes: Vec::new(),
                    },
                );
            }
            let Some(annotation) = annotations.get_mut(&path) else {
                continue;
            };

            let class_id = row
                .get(CLASS_ID_COLUMN)
                .and_then(|id| id.trim().parse::<i64>().ok())
                .unwrap_or(-1);
            if class_id < 0 {
                continue;
            }
            let class_id = class_id as u32;
            let class_name = row.get(CLASS_NAME_COLUMN).unwrap_or_default().to_string();
            classes.entry(class_id).or_insert_with(|| class_name.clone());

            for polygon in row.geometry.iter().flat_map(|g| g.0.iter()) {
                let points = exterior_points(polygon);
                if points.len() < 3 {
                    continue;
                }
                annotation.shapes.push(Shape {
                    class_id,
                    class_name: class_name.clone(),
                    points,
                });
            }
        }

        let annotations = order
            .into_iter()
            .filter_map(|path| annotations.remove(&path))
            .collect();
        Ok(Self {
            classes,
            annotations,
            format,
            split: None,
            labels: Vec::new(),
        })
    }

    /// Number of annotated shapes
    pub fn label_count(&self) -> usize {
        self.annotations.iter().map(|a| a.shapes.len()).sum()
    }

    /// Write one label file per image into `dest`
    pub fn generate_label_files(&self, dest: &Path, clear_dir: bool, overwrite: bool) -> Result<Vec<PathBuf>> {
        if clear_dir {
            clear_directory(dest)?;
        } else {
            std::fs::create_dir_all(dest)?;
        }
        let pb = create_progress_bar(self.annotations.len() as u64, "Labels");
        let written = write_label_files_in_parallel(&self.annotations, dest, self.format, overwrite, &pb);
        pb.finish_with_message("Label generation complete");
        info!("Wrote {} label files to {}", written.len(), dest.display());
        Ok(written)
    }

    /// Write `data.yaml` into `dest_dir`, pointing at `dataset_root`
    pub fn generate_yaml_file(&self, dataset_root: &Path, dest_dir: &Path, has_test: bool) -> Result<PathBuf> {
        let dest = dest_dir.join("data.yaml");
        create_dataset_yaml(&dest, dataset_root, &self.classes, has_test)?;
        Ok(dest)
    }

    /// Record the split and read its labels back
    pub fn set_split(&mut self, split: SplitData) -> Result<()> {
        let mut labels = Vec::new();
        for pair in split.train.iter().chain(&split.val).chain(&split.test) {
            let filename = pair
                .image
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut pair_labels = AnnotatedLabel::from_file(&pair.label, &filename)?;
            for label in pair_labels.iter_mut() {
                if let Some(name) = label.class_id.and_then(|id| self.classes.get(&id)) {
                    label.class_name = name.clone();
                }
            }
            labels.extend(pair_labels);
        }
        self.labels = labels;
        self.split = Some(split);
        Ok(())
    }

    /// Save one row per shape (one row per background image) as CSV
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for annotation in &self.annotations {
            let image = &annotation.image;
            let base = LabelRow {
                filename: &image.filename,
                path: image.path.to_string_lossy().into_owned(),
                width: image.width,
                height: image.height,
                class_id: None,
                class_name: "",
                bbox_x: None,
                bbox_y: None,
                bbox_width: None,
                bbox_height: None,
                segments: String::new(),
            };
            if annotation.shapes.is_empty() {
                writer.serialize(&base)?;
                continue;
            }
            for shape in &annotation.shapes {
                let flat: Vec<f64> = shape.points.iter().flat_map(|&(x, y)| [x, y]).collect();
                let bbox = crate::types::BBox::from_segments(&flat);
                writer.serialize(LabelRow {
                    class_id: Some(shape.class_id),
                    class_name: &shape.class_name,
                    bbox_x: bbox.map(|b| b.x),
                    bbox_y: bbox.map(|b| b.y),
                    bbox_width: bbox.map(|b| b.width),
                    bbox_height: bbox.map(|b| b.height),
                    segments: flat
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                    path: base.path.clone(),
                    ..base
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn summary(&self) -> DatasetSummary {
        let (train, val, test) = match &self.split {
            Some(split) => (split.train.len(), split.val.len(), split.test.len()),
            None => (0, 0, 0),
        };
        DatasetSummary {
            classes: self.classes.clone(),
            images: self.annotations.len(),
            background_images: self.annotations.iter().filter(|a| a.is_background()).count(),
            labels: self.label_count(),
            train,
            val,
            test,
        }
    }

    pub fn print_summary(&self) {
        for line in self.summary().to_string().lines() {
            info!("{}", line);
        }
    }
}
