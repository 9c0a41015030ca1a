use indicatif::ProgressBar;
use log::error;
use rayon::prelude::*;
use std::fs::{self, copy, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Format;
use crate::types::{ImageAnnotation, ImageLabelPair, Shape};
use crate::utils::sanitized_stem;

/// Write the label files of a batch of annotations in parallel.
///
/// Returns the label files written; failures are logged and skipped.
pub fn write_label_files_in_parallel(
    annotations: &[ImageAnnotation],
    labels_dir: &Path,
    format: Format,
    overwrite: bool,
    pb: &ProgressBar,
) -> Vec<PathBuf> {
    annotations
        .par_iter()
        .filter_map(|annotation| {
            let result = write_label_file(annotation, labels_dir, format, overwrite);
            pb.inc(1);
            match result {
                Ok(path) => path,
                Err(e) => {
                    error!(
                        "Failed to write label for {}: {}",
                        annotation.image.path.display(),
                        e
                    );
                    None
                }
            }
        })
        .collect()
}

/// Write the label file of one chip; existing files are kept unless `overwrite`
pub fn write_label_file(
    annotation: &ImageAnnotation,
    labels_dir: &Path,
    format: Format,
    overwrite: bool,
) -> std::io::Result<Option<PathBuf>> {
    let sanitized_name = sanitized_stem(&annotation.image.path);
    let label_output_path = labels_dir.join(&sanitized_name).with_extension("txt");
    if label_output_path.exists() && !overwrite {
        return Ok(None);
    }

    let mut writer = BufWriter::new(File::create(&label_output_path)?);
    // background chips get an empty label file
    let yolo_data = convert_to_yolo_format(annotation, format);
    writer.write_all(yolo_data.as_bytes())?;
    writer.flush()?;
    Ok(Some(label_output_path))
}

/// Convert an annotation to YOLO format (bounding box or polygon)
pub fn convert_to_yolo_format(annotation: &ImageAnnotation, format: Format) -> String {
    let mut yolo_data = String::with_capacity(annotation.shapes.len() * 64);

    for shape in &annotation.shapes {
        if shape.points.is_empty() {
            continue;
        }
        match format {
            Format::Polygon => {
                yolo_data.push_str(&format!("{}", shape.class_id));
                process_polygon_shape(&mut yolo_data, annotation, shape);
                yolo_data.push('\n');
            }
            Format::Bbox => {
                let (x_center, y_center, width, height) = calculate_bounding_box(annotation, shape);
                yolo_data.push_str(&format!(
                    "{} {:.6} {:.6} {:.6} {:.6}\n",
                    shape.class_id, x_center, y_center, width, height
                ));
            }
        }
    }

    yolo_data
}

/// Process polygon shape data for YOLO format
pub fn process_polygon_shape(yolo_data: &mut String, annotation: &ImageAnnotation, shape: &Shape) {
    for &(x, y) in &shape.points {
        let x_norm = x / annotation.image.width as f64;
        let y_norm = y / annotation.image.height as f64;
        yolo_data.push_str(&format!(" {:.6} {:.6}", x_norm, y_norm));
    }
}

/// Calculate bounding box for YOLO format
pub fn calculate_bounding_box(annotation: &ImageAnnotation, shape: &Shape) -> (f64, f64, f64, f64) {
    let (x_min, y_min, x_max, y_max) = shape.points.iter().fold(
        (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
        |(x_min, y_min, x_max, y_max), &(x, y)| {
            (x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y))
        },
    );

    let x_center = (x_min + x_max) / 2.0 / annotation.image.width as f64;
    let y_center = (y_min + y_max) / 2.0 / annotation.image.height as f64;
    let width = (x_max - x_min) / annotation.image.width as f64;
    let height = (y_max - y_min) / annotation.image.height as f64;

    (x_center, y_center, width, height)
}

/// Copy a batch of image/label pairs into a split in parallel
pub fn copy_pairs_in_parallel(
    pairs: &[ImageLabelPair],
    images_dir: &Path,
    labels_dir: &Path,
    pb: &ProgressBar,
) {
    pairs.par_iter().for_each(|pair| {
        if let Err(e) = copy_pair(pair, images_dir, labels_dir) {
            error!("Failed to copy {}: {}", pair.image.display(), e);
        }
        pb.inc(1);
    });
}

/// Copy one image and its label file
pub fn copy_pair(pair: &ImageLabelPair, images_dir: &Path, labels_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(images_dir)?;
    fs::create_dir_all(labels_dir)?;
    let image_name = pair.image.file_name().unwrap_or_default();
    let label_name = pair.label.file_name().unwrap_or_default();
    copy(&pair.image, images_dir.join(image_name))?;
    copy(&pair.label, labels_dir.join(label_name))?;
    Ok(())
}
