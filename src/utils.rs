use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use std::fs;
use std::path::{Path, PathBuf};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Safely create output directories and return their paths
pub fn create_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).and_then(|_| fs::create_dir_all(path))?;
    } else {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Remove everything inside a directory but keep the directory itself
pub fn clear_directory(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return fs::create_dir_all(path);
    }
    for entry in fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_dir() {
            fs::remove_dir_all(&entry_path)?;
        } else {
            fs::remove_file(&entry_path)?;
        }
    }
    Ok(())
}

/// Files below `dir` accepted by `keep`, sorted
pub fn collect_files_matching<F>(dir: &Path, recurse: bool, keep: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let pattern = if recurse {
        dir.join("**").join("*")
    } else {
        dir.join("*")
    };
    let mut files: Vec<PathBuf> = match glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter(|path| path.is_file() && keep(path.as_path()))
            .collect(),
        Err(e) => {
            warn!("Invalid glob pattern {}: {}", pattern.display(), e);
            Vec::new()
        }
    };
    files.sort();
    files
}

/// Files below `dir` with the given extension (without the dot), sorted
pub fn collect_files_with_suffix(dir: &Path, extension: &str, recurse: bool) -> Vec<PathBuf> {
    collect_files_matching(dir, recurse, |path| {
        path.extension().is_some_and(|ext| ext == extension)
    })
}

/// Delete `path`'s parent and grandparent directories when they became empty
pub fn remove_empty_parents(path: &Path) -> std::io::Result<()> {
    let mut current = path.parent();
    for _ in 0..2 {
        let Some(dir) = current else { break };
        if !dir.is_dir() || fs::read_dir(dir)?.next().is_some() {
            break;
        }
        fs::remove_dir(dir)?;
        current = dir.parent();
    }
    Ok(())
}

/// Sanitized file stem, safe to use as an output file name
pub fn sanitized_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_filename::sanitize(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_with_suffix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.tif"), b"").unwrap();
        fs::write(root.join("a/b/deep.tif"), b"").unwrap();
        fs::write(root.join("a/other.png"), b"").unwrap();

        assert_eq!(collect_files_with_suffix(root, "tif", true).len(), 2);
        assert_eq!(
            collect_files_with_suffix(root, "tif", false),
            vec![root.join("top.tif")]
        );
    }

    #[test]
    fn test_remove_empty_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let chip = temp_dir.path().join("chips/image/chip.tif");
        fs::create_dir_all(chip.parent().unwrap()).unwrap();
        fs::write(&chip, b"").unwrap();
        fs::remove_file(&chip).unwrap();

        remove_empty_parents(&chip).unwrap();
        assert!(!temp_dir.path().join("chips").exists());
        assert!(temp_dir.path().exists());
    }

    #[test]
    fn test_clear_directory_keeps_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("out");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("file.txt"), b"x").unwrap();

        clear_directory(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_sanitized_stem() {
        assert_eq!(sanitized_stem(Path::new("dir/chip_0_0.tif")), "chip_0_0");
    }
}
