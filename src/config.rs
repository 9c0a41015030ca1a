use clap::{Parser, ValueEnum};
use std::fmt;
use std::str::FromStr;

/// Command-line arguments for building a YOLO dataset from NDVI difference rasters.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    /// Root directory holding the datasets and models trees
    #[arg(short = 'r', long = "root_dir")]
    pub root_dir: String,

    /// Treatment shapefile, relative to <root_dir>/datasets/shapefiles
    #[arg(short = 's', long = "shapefile")]
    pub shapefile: String,

    /// First year of the NDVI difference range
    #[arg(long = "start_year")]
    pub start_year: i32,

    /// Last year of the NDVI difference range
    #[arg(long = "end_year")]
    pub end_year: i32,

    /// Width and height of the generated chips in pixels
    #[arg(long = "chip_size", default_value_t = 512, value_parser = clap::value_parser!(u32).range(1..))]
    pub chip_size: u32,

    /// Strategy used to split chips into train/val/test
    #[arg(long = "split_mode", value_enum, default_value = "all")]
    pub split_mode: SplitMode,

    /// Name the model directory for fine-tuning a pretrained model
    #[arg(long = "pretrained")]
    pub pretrained: bool,

    /// UTM zone of the input data, used in output file names
    #[arg(long = "utm_zone", default_value_t = 10)]
    pub utm_zone: u8,

    /// Attribute holding the treatment type
    #[arg(long = "treatment_column", default_value = "TreatmentT")]
    pub treatment_column: String,

    /// Treatment type to keep
    #[arg(long = "treatment_code", default_value = "6")]
    pub treatment_code: String,

    /// Attribute naming the NDVI image a polygon belongs to
    #[arg(long = "id_column", default_value = "Subregion")]
    pub id_column: String,

    /// Attribute holding the first year of a treatment
    #[arg(long = "start_year_col", default_value = "StartYear")]
    pub start_year_col: String,

    /// Attribute holding the last year of a treatment
    #[arg(long = "end_year_col", default_value = "EndYear")]
    pub end_year_col: String,

    /// Proportion of the (non-test) chips used for training
    #[arg(long = "split", default_value_t = 0.75, value_parser = validate_size)]
    pub split: f32,

    /// Proportion of the chips held out for testing
    #[arg(long = "test_size", default_value_t = 0.0, value_parser = validate_size)]
    pub test_size: f32,

    /// Seed for random shuffling
    #[arg(long = "seed", default_value_t = 42)]
    pub seed: u64,

    /// Output format for YOLO annotations: 'polygon' or 'bbox'
    #[arg(
        long = "output_format",
        visible_alias = "format",
        value_enum,
        default_value = "polygon"
    )]
    pub output_format: Format,

    /// Wipe the model directory before writing
    #[arg(long = "clean_dest")]
    pub clean_dest: bool,

    /// Allow overwriting existing outputs
    #[arg(long = "exist_ok")]
    pub exist_ok: bool,

    /// Keep the chip order instead of shuffling before the split
    #[arg(long = "no_shuffle")]
    pub no_shuffle: bool,

    /// Ratio of background chips to keep relative to labeled chips
    #[arg(long = "background_bias", value_parser = validate_bias)]
    pub background_bias: Option<f32>,

    /// Minimum number of labels required to build the dataset
    #[arg(long = "min_labels", default_value_t = 10)]
    pub min_labels: usize,

    /// Worker threads for chipping and conversion (defaults to all CPUs)
    #[arg(long = "num_workers")]
    pub num_workers: Option<usize>,

    /// Keep GeoTIFF chips as dataset images instead of converting to PNG
    #[arg(long = "no_png")]
    pub no_png: bool,

    /// Only generate labels, skip the train/val/test split
    #[arg(long = "no_train_data")]
    pub no_train_data: bool,

    /// Do not save intermediate CSV and shapefile tables
    #[arg(long = "no_meta")]
    pub no_meta: bool,
}

// Enumeration for the YOLO output format
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum Format {
    Polygon,
    Bbox,
}

// Strategies for splitting chips into train/val/test
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum SplitMode {
    /// Split the whole chip set at once
    All,
    /// Split each source GeoTIFF's chips separately
    Collection,
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitMode::All => write!(f, "all"),
            SplitMode::Collection => write!(f, "collection"),
        }
    }
}

/// Scalar run parameters threaded through path construction and dataset generation
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub chip_size: u32,
    pub start_year: i32,
    pub end_year: i32,
    pub pretrained: bool,
    pub split_mode: SplitMode,
    pub utm_zone: u8,
    pub shapefile: String,
}

impl From<&Args> for RunParams {
    fn from(args: &Args) -> Self {
        Self {
            chip_size: args.chip_size,
            start_year: args.start_year,
            end_year: args.end_year,
            pretrained: args.pretrained,
            split_mode: args.split_mode,
            utm_zone: args.utm_zone,
            shapefile: args.shapefile.clone(),
        }
    }
}

/// Options recognised by `ndvi_to_yolo_dataset`
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub id_column: String,
    pub start_year_col: String,
    pub end_year_col: String,
    /// Restrict the dataset to one (start, end) year pair
    pub years: Option<(i32, i32)>,
    pub chip_size: Option<u32>,
    pub clean_dest: bool,
    pub xy_to_index: bool,
    pub exist_ok: bool,
    pub save_csv: bool,
    pub save_shp: bool,
    pub ignore_empty_geom: bool,
    pub generate_labels: bool,
    pub generate_train_data: bool,
    pub tif_to_png: bool,
    pub format: Format,
    pub split: f32,
    pub test_size: f32,
    pub split_mode: SplitMode,
    pub shuffle: bool,
    pub seed: u64,
    pub background_bias: Option<f32>,
    pub min_labels_required: usize,
    pub num_workers: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            id_column: "Subregion".to_string(),
            start_year_col: "StartYear".to_string(),
            end_year_col: "EndYear".to_string(),
            years: None,
            chip_size: None,
            clean_dest: false,
            xy_to_index: true,
            exist_ok: false,
            save_csv: false,
            save_shp: false,
            ignore_empty_geom: true,
            generate_labels: true,
            generate_train_data: true,
            tif_to_png: true,
            format: Format::Polygon,
            split: 0.75,
            test_size: 0.0,
            split_mode: SplitMode::All,
            shuffle: true,
            seed: 42,
            background_bias: None,
            min_labels_required: 10,
            num_workers: None,
        }
    }
}

impl From<&Args> for DatasetConfig {
    fn from(args: &Args) -> Self {
        Self {
            id_column: args.id_column.clone(),
            start_year_col: args.start_year_col.clone(),
            end_year_col: args.end_year_col.clone(),
            years: None,
            chip_size: Some(args.chip_size),
            clean_dest: args.clean_dest,
            xy_to_index: true,
            exist_ok: args.exist_ok,
            save_csv: !args.no_meta,
            save_shp: !args.no_meta,
            ignore_empty_geom: true,
            generate_labels: true,
            generate_train_data: !args.no_train_data,
            tif_to_png: !args.no_png,
            format: args.output_format,
            split: args.split,
            test_size: args.test_size,
            split_mode: args.split_mode,
            shuffle: !args.no_shuffle,
            seed: args.seed,
            background_bias: args.background_bias,
            min_labels_required: args.min_labels,
            num_workers: args.num_workers,
        }
    }
}

// Validate that the size is between 0.0 and 1.0
pub fn validate_size(s: &str) -> Result<f32, String> {
    match f32::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

// Background bias may exceed 1.0 but never be negative
fn validate_bias(s: &str) -> Result<f32, String> {
    match f32::from_str(s) {
        Ok(val) if val >= 0.0 && val.is_finite() => Ok(val),
        _ => Err("BIAS must be a non-negative number".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bias() {
        assert_eq!(validate_bias("1.5"), Ok(1.5));
        assert!(validate_bias("-1").is_err());
        assert!(validate_bias("inf").is_err());
    }

    #[test]
    fn test_args_into_dataset_config() {
        let args = Args::parse_from([
            "ndvi2yolo",
            "--root_dir",
            "/data",
            "--shapefile",
            "treatments.shp",
            "--start_year",
            "2019",
            "--end_year",
            "2022",
            "--chip_size",
            "320",
            "--split_mode",
            "collection",
            "--no_png",
        ]);
        let config = DatasetConfig::from(&args);
        assert_eq!(config.chip_size, Some(320));
        assert_eq!(config.split_mode, SplitMode::Collection);
        assert!(!config.tif_to_png);
        assert!(config.shuffle);
        assert!(config.save_csv && config.save_shp);

        let params = RunParams::from(&args);
        assert_eq!(params.start_year, 2019);
        assert_eq!(params.end_year, 2022);
        assert_eq!(params.utm_zone, 10);
    }
}
