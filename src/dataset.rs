use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SplitMode;
use crate::conversion::copy_pairs_in_parallel;
use crate::error::{Error, Result};
use crate::types::{file_stem, is_image_file, ImageLabelPair, OutputDirs, SplitData};
use crate::utils::{collect_files_matching, collect_files_with_suffix, create_progress_bar};

/// Parameters of the train/val/test split
#[derive(Debug, Clone, Copy)]
pub struct SplitOptions {
    /// Fraction of the non-test pairs used for training
    pub split: f32,
    pub test_size: f32,
    pub mode: SplitMode,
    pub shuffle: bool,
    pub seed: u64,
}

/// Pair every image with the label file of the same stem.
///
/// Label files without an image are deleted; images without a label are skipped.
pub fn pair_images_and_labels(images_dir: &Path, labels_dir: &Path) -> Result<Vec<ImageLabelPair>> {
    let images = collect_files_matching(images_dir, true, is_image_file);
    if images.is_empty() {
        return Err(Error::NoImages(images_dir.to_path_buf()));
    }

    let labels: HashMap<String, PathBuf> = collect_files_with_suffix(labels_dir, "txt", true)
        .into_iter()
        .map(|path| (file_stem(&path), path))
        .collect();
    let image_stems: HashSet<String> = images.iter().map(|path| file_stem(path)).collect();

    for (stem, label) in &labels {
        if !image_stems.contains(stem) {
            warn!("Removing label without image: {}", label.display());
            fs::remove_file(label)?;
        }
    }

    let pairs: Vec<ImageLabelPair> = images
        .into_iter()
        .filter_map(|image| {
            let label = labels.get(&file_stem(&image))?.clone();
            Some(ImageLabelPair { image, label })
        })
        .collect();
    Ok(pairs)
}

/// Split pairs into train/val/test.
///
/// The test set takes `ceil(n * test_size)` pairs, training takes
/// `floor(rest * split)` and validation the remainder.
pub fn split_pairs(mut pairs: Vec<ImageLabelPair>, options: &SplitOptions, rng: &mut StdRng) -> SplitData {
    if options.shuffle {
        pairs.shuffle(rng);
    }

    let test_size = ((pairs.len() as f32 * options.test_size).ceil() as usize).min(pairs.len());
    let test: Vec<ImageLabelPair> = pairs.drain(0..test_size).collect();
    let train_size = (pairs.len() as f32 * options.split) as usize;
    let train: Vec<ImageLabelPair> = pairs.drain(0..train_size.min(pairs.len())).collect();

    SplitData {
        train,
        val: pairs,
        test,
    }
}

/// Split each collection (parent directory of the image) separately and merge
pub fn split_by_collection(pairs: Vec<ImageLabelPair>, options: &SplitOptions, rng: &mut StdRng) -> SplitData {
    let mut collections: BTreeMap<String, Vec<ImageLabelPair>> = BTreeMap::new();
    for pair in pairs {
        let name = pair
            .image
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        collections.entry(name).or_default().push(pair);
    }

    let mut split_data = SplitData::default();
    for (_, collection) in collections {
        let part = split_pairs(collection, options, rng);
        split_data.train.extend(part.train);
        split_data.val.extend(part.val);
        split_data.test.extend(part.test);
    }
    split_data
}

// An image stem belongs to one split only; the first split claiming it wins
fn dedupe_by_stem(split_data: &mut SplitData) {
    let mut stems = HashSet::new();
    for pairs in [&mut split_data.test, &mut split_data.train, &mut split_data.val] {
        pairs.retain(|pair| stems.insert(file_stem(&pair.image)));
    }
}

/// Pair the images and labels found below the directories and split them
pub fn split_dataset(images_dir: &Path, labels_dir: &Path, options: &SplitOptions) -> Result<SplitData> {
    let pairs = pair_images_and_labels(images_dir, labels_dir)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut split_data = match options.mode {
        SplitMode::All => split_pairs(pairs, options, &mut rng),
        SplitMode::Collection => split_by_collection(pairs, options, &mut rng),
    };
    dedupe_by_stem(&mut split_data);
    info!(
        "Split {} images: {} train, {} val, {} test",
        split_data.len(),
        split_data.train.len(),
        split_data.val.len(),
        split_data.test.len()
    );
    Ok(split_data)
}

/// Copy all splits into their output directories, one thread per split
pub fn copy_split_data(split_data: &SplitData, output_dirs: &OutputDirs) {
    let splits = [
        ("Train", &split_data.train, &output_dirs.train_images_dir, &output_dirs.train_labels_dir),
        ("Val", &split_data.val, &output_dirs.val_images_dir, &output_dirs.val_labels_dir),
        ("Test", &split_data.test, &output_dirs.test_images_dir, &output_dirs.test_labels_dir),
    ];

    let mut handles = Vec::new();
    for (label, pairs, images_dir, labels_dir) in splits {
        if pairs.is_empty() {
            continue;
        }
        let pb = create_progress_bar(pairs.len() as u64, label);
        let pairs = pairs.clone();
        let images_dir = images_dir.clone();
        let labels_dir = labels_dir.clone();

        handles.push(std::thread::spawn(move || {
            copy_pairs_in_parallel(&pairs, &images_dir, &labels_dir, &pb);
            pb.finish_with_message(format!("{} copying complete", label));
        }));
    }

    // Wait for all threads to complete
    for handle in handles {
        if handle.join().is_err() {
            error!("A split copy worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(n: usize, collection: &str) -> Vec<ImageLabelPair> {
        (0..n)
            .map(|i| ImageLabelPair {
                image: PathBuf::from(format!("/png/{collection}/{collection}_chip_{i}.png")),
                label: PathBuf::from(format!("/labels/{collection}_chip_{i}.txt")),
            })
            .collect()
    }

    fn options(mode: SplitMode) -> SplitOptions {
        SplitOptions {
            split: 0.75,
            test_size: 0.25,
            mode,
            shuffle: true,
            seed: 42,
        }
    }

    #[test]
    fn test_split_sizes() {
        let mut rng = StdRng::seed_from_u64(42);
        let split_data = split_pairs(pairs(8, "a"), &options(SplitMode::All), &mut rng);
        assert_eq!(split_data.test.len(), 2);
        assert_eq!(split_data.train.len(), 4);
        assert_eq!(split_data.val.len(), 2);
    }

    #[test]
    fn test_split_is_seeded() {
        let first = split_pairs(pairs(10, "a"), &options(SplitMode::All), &mut StdRng::seed_from_u64(7));
        let second = split_pairs(pairs(10, "a"), &options(SplitMode::All), &mut StdRng::seed_from_u64(7));
        assert_eq!(first.train, second.train);
    }

    #[test]
    fn test_split_without_shuffle_keeps_order() {
        let mut options = options(SplitMode::All);
        options.shuffle = false;
        options.test_size = 0.0;
        let split_data = split_pairs(pairs(4, "a"), &options, &mut StdRng::seed_from_u64(1));
        assert_eq!(split_data.train, pairs(4, "a")[..3].to_vec());
        assert!(split_data.test.is_empty());
    }

    #[test]
    fn test_collection_split_per_directory() {
        let mut all = pairs(4, "a");
        all.extend(pairs(8, "b"));
        let mut options = options(SplitMode::Collection);
        options.test_size = 0.0;
        let split_data = split_by_collection(all, &options, &mut StdRng::seed_from_u64(42));
        assert_eq!(split_data.train.len(), 3 + 6);
        assert_eq!(split_data.val.len(), 1 + 2);
    }

    #[test]
    fn test_dedupe_across_splits() {
        let mut split_data = SplitData {
            train: pairs(2, "a"),
            val: pairs(3, "a"),
            test: Vec::new(),
        };
        dedupe_by_stem(&mut split_data);
        assert_eq!(split_data.train.len(), 2);
        assert_eq!(split_data.val.len(), 1);
    }

    #[test]
    fn test_pairing_removes_orphan_labels() {
        let temp_dir = tempfile::tempdir().unwrap();
        let images = temp_dir.path().join("images/a");
        let labels = temp_dir.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        fs::write(images.join("c0.png"), b"").unwrap();
        fs::write(images.join("c1.png"), b"").unwrap();
        fs::write(labels.join("c0.txt"), b"").unwrap();
        fs::write(labels.join("orphan.txt"), b"").unwrap();

        let pairs = pair_images_and_labels(&temp_dir.path().join("images"), &labels).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].label, labels.join("c0.txt"));
        assert!(!labels.join("orphan.txt").exists());
    }

    #[test]
    fn test_pairing_accepts_any_image_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let images = temp_dir.path().join("images");
        let labels = temp_dir.path().join("labels");
        fs::create_dir_all(images.join("nested")).unwrap();
        fs::create_dir_all(&labels).unwrap();
        fs::write(images.join("c0.TIF"), b"").unwrap();
        fs::write(images.join("nested/c1.jpeg"), b"").unwrap();
        fs::write(images.join("c0.png.aux.xml"), b"").unwrap();
        for stem in ["c0", "c1"] {
            fs::write(labels.join(format!("{}.txt", stem)), b"").unwrap();
        }

        let pairs = pair_images_and_labels(&images, &labels).unwrap();
        let found: Vec<PathBuf> = pairs.into_iter().map(|pair| pair.image).collect();
        assert_eq!(found, vec![images.join("c0.TIF"), images.join("nested/c1.jpeg")]);
    }

    #[test]
    fn test_pairing_without_images() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = pair_images_and_labels(temp_dir.path(), temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::NoImages(_)));
    }
}
