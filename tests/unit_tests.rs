use ndvi2yolo::chips::{chip_name, chip_windows, is_informative};
use ndvi2yolo::classify::{classify, ClassLabel};
use ndvi2yolo::config::{validate_size, Format, RunParams, SplitMode};
use ndvi2yolo::conversion::{calculate_bounding_box, convert_to_yolo_format};
use ndvi2yolo::geometry::{GeoTransform, Window};
use ndvi2yolo::paths::build_path_table;
use ndvi2yolo::preprocess::ndvi_filename;
use ndvi2yolo::table::Record;
use ndvi2yolo::types::{ImageAnnotation, ImageData, Shape};

use geo::{polygon, MultiPolygon};
use std::path::Path;

#[test]
fn test_validate_size() {
    assert!(validate_size("0.5").is_ok());
    assert!(validate_size("1.0").is_ok());
    assert!(validate_size("0.0").is_ok());
    assert!(validate_size("-0.1").is_err());
    assert!(validate_size("1.1").is_err());
    assert!(validate_size("abc").is_err());
}

#[test]
fn test_calculate_bounding_box() {
    let annotation = ImageAnnotation {
        image: ImageData::new(Path::new("chip.png"), 100, 100),
        shapes: vec![],
    };
    let shape = Shape {
        class_id: 0,
        class_name: "Treatment".to_string(),
        points: vec![(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)],
    };

    let (x_center, y_center, width, height) = calculate_bounding_box(&annotation, &shape);

    assert_eq!(x_center, 0.15);
    assert_eq!(y_center, 0.15);
    assert_eq!(width, 0.1);
    assert_eq!(height, 0.1);
}

#[test]
fn test_convert_to_yolo_format() {
    let annotation = ImageAnnotation {
        image: ImageData::new(Path::new("chip.png"), 100, 100),
        shapes: vec![Shape {
            class_id: 0,
            class_name: "Treatment".to_string(),
            points: vec![(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)],
        }],
    };

    let yolo_data = convert_to_yolo_format(&annotation, Format::Bbox);
    assert_eq!(yolo_data, "0 0.150000 0.150000 0.100000 0.100000\n");

    let yolo_data = convert_to_yolo_format(&annotation, Format::Polygon);
    assert_eq!(
        yolo_data,
        "0 0.100000 0.100000 0.200000 0.100000 0.200000 0.200000 0.100000 0.200000\n"
    );
}

#[test]
fn test_classify_threshold() {
    let small = Record::new(Some(MultiPolygon::new(vec![polygon![
        (x: 0.0, y: 0.0),
        (x: 1.0, y: 0.0),
        (x: 1.0, y: 1.0),
        (x: 0.0, y: 1.0),
    ]])));
    let large = Record::new(Some(MultiPolygon::new(vec![polygon![
        (x: 0.0, y: 0.0),
        (x: 1.5, y: 0.0),
        (x: 1.5, y: 1.0),
        (x: 0.0, y: 1.0),
    ]])));
    assert_eq!(classify(&small), ClassLabel::Background);
    assert_eq!(classify(&large), ClassLabel::Treatment);
    assert_eq!(classify(&Record::new(None)).code(), "-1");
}

#[test]
fn test_path_table_layout() {
    let params = RunParams {
        chip_size: 256,
        start_year: 2018,
        end_year: 2021,
        pretrained: false,
        split_mode: SplitMode::Collection,
        utm_zone: 11,
        shapefile: "treatments.shp".to_string(),
    };
    let table = build_path_table(Path::new("/data"), &params);
    assert_eq!(table.ndvi, Path::new("/data/datasets/ndvi"));
    assert_eq!(
        table.input_shapefile,
        Path::new("/data/datasets/shapefiles/treatments.shp")
    );
    assert!(table
        .csv_base
        .ends_with("base_all_years=2018to2021_utm11.csv"));
    assert!(table.model.ends_with("ndvi_256px_2018to2021_collection"));
    assert_eq!(table.config_yaml, table.model.join("config/data.yaml"));
    assert!(table.entries().iter().any(|(name, _)| *name == "CSVZ10"));
}

#[test]
fn test_chip_names_follow_windows() {
    let windows = chip_windows(600, 300, Some(256));
    let names: Vec<String> = windows
        .iter()
        .map(|w| chip_name("Tahoe_2019to2022_NDVI_Difference", w.row_off, w.col_off))
        .collect();
    assert_eq!(names.len(), 6);
    assert_eq!(names[0], "Tahoe_2019to2022_NDVI_Difference_chip_0_0.tif");
    assert_eq!(names[5], "Tahoe_2019to2022_NDVI_Difference_chip_256_512.tif");
    assert!(is_informative(&[0.3; 4], 2, 2, None));
}

#[test]
fn test_window_transform_and_filename() {
    let gt = GeoTransform::north_up(600_000.0, 4_200_000.0, 30.0);
    let chip = gt.window_transform(&Window::new(256, 512, 256, 256));
    assert_eq!(chip.xy(0, 0), (600_000.0 + 256.0 * 30.0, 4_200_000.0 - 512.0 * 30.0));
    assert_eq!(
        ndvi_filename("Plumas3", 2019, 2022),
        "Plumas3_2019to2022_NDVI_Difference.tif"
    );
}
