//! Finding the videos worth renaming.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::rename::filename::has_video_extension;

/// Shortest stem that still counts as a hash-like name
const MIN_GARBLED_LEN: usize = 8;

static HEX_STEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]+$").expect("hex stem pattern is valid"));

/// Whether a file name looks machine generated: a stem of at least eight
/// hexadecimal characters, case-insensitive.
pub fn is_garbled_filename(name: &str) -> bool {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if stem.chars().count() < MIN_GARBLED_LEN {
        return false;
    }

    HEX_STEM.is_match(&stem)
}

pub fn is_video_file<P: AsRef<Path>>(path: P, video_extensions: &[String]) -> bool {
    path.as_ref()
        .file_name()
        .is_some_and(|name| has_video_extension(&name.to_string_lossy(), video_extensions))
}

/// All video files under `root`, sorted by path.
pub fn scan_directory<P: AsRef<Path>>(
    root: P,
    recursive: bool,
    video_extensions: &[String],
) -> Vec<PathBuf> {
    let root = root.as_ref();
    if !root.is_dir() {
        warn!("Not a directory: {:?}", root);
        return Vec::new();
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!("Skipping unreadable entry during scan: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_video_file(e.path(), video_extensions))
        .map(|e| e.into_path())
        .collect();

    files.sort();
    info!("Found {} video files in {:?}", files.len(), root);
    files
}

/// Video files under `root` whose names look like hashes
pub fn find_garbled_files<P: AsRef<Path>>(
    root: P,
    recursive: bool,
    video_extensions: &[String],
) -> Vec<PathBuf> {
    let garbled: Vec<PathBuf> = scan_directory(root, recursive, video_extensions)
        .into_iter()
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| is_garbled_filename(&n.to_string_lossy()))
        })
        .collect();

    info!("{} of them have garbled names", garbled.len());
    garbled
}

/// Keep files whose size in MB lies within the given bounds. Files that
/// cannot be read are dropped.
pub fn filter_by_size(files: Vec<PathBuf>, min_mb: Option<f64>, max_mb: Option<f64>) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|path| {
            let size_mb = match std::fs::metadata(path) {
                Ok(meta) => meta.len() as f64 / (1024.0 * 1024.0),
                Err(e) => {
                    warn!("Failed to read size of {:?}: {}", path, e);
                    return false;
                }
            };
            min_mb.is_none_or(|min| size_mb >= min) && max_mb.is_none_or(|max| size_mb <= max)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exts() -> Vec<String> {
        vec![".mp4".to_string(), ".mkv".to_string()]
    }

    #[test]
    fn test_is_garbled_filename() {
        assert!(is_garbled_filename("d41d8cd98f00b204e9800998ecf8427e.mp4"));
        assert!(is_garbled_filename("DEADBEEF.MKV"));
        assert!(is_garbled_filename("0123456789"));
        assert!(!is_garbled_filename("abc123.mp4"));
        assert!(!is_garbled_filename("holiday_2023.mp4"));
        assert!(!is_garbled_filename("deadbeefz.mp4"));
    }

    #[test]
    fn test_scan_directory_depth_and_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        fs::write(dir.path().join("a.MKV"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(nested.join("c.mp4"), b"x").unwrap();

        let flat = scan_directory(dir.path(), false, &exts());
        assert_eq!(flat, vec![dir.path().join("a.MKV"), dir.path().join("b.mp4")]);

        let deep = scan_directory(dir.path(), true, &exts());
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&nested.join("c.mp4")));

        assert!(scan_directory(dir.path().join("missing"), true, &exts()).is_empty());
    }

    #[test]
    fn test_find_garbled_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0a1b2c3d4e5f.mp4"), b"x").unwrap();
        fs::write(dir.path().join("birthday.mp4"), b"x").unwrap();
        fs::write(dir.path().join("0a1b2c3d4e5f.txt"), b"x").unwrap();

        let found = find_garbled_files(dir.path(), true, &exts());
        assert_eq!(found, vec![dir.path().join("0a1b2c3d4e5f.mp4")]);
    }

    #[test]
    fn test_filter_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.mp4");
        let big = dir.path().join("big.mp4");
        fs::write(&small, vec![0u8; 1024]).unwrap();
        fs::write(&big, vec![0u8; 2 * 1024 * 1024]).unwrap();
        let files = vec![small.clone(), big.clone(), dir.path().join("gone.mp4")];

        assert_eq!(filter_by_size(files.clone(), None, None), vec![small.clone(), big.clone()]);
        assert_eq!(filter_by_size(files.clone(), Some(1.0), None), vec![big]);
        assert_eq!(filter_by_size(files, None, Some(1.0)), vec![small]);
    }
}
