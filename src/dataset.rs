//! Dataset layout conventions.
//!
//! A dataset root contains an `images/` directory, a parallel `labels/`
//! directory with one `.txt` label file per image (same stem), and a
//! `labels.txt` listing category names in index order. All paths handed to a
//! storage backend are forward-relative to the backend root.

use std::path::Path;

use crate::storage::{Storage, StorageError};

/// Directory under the backend root that holds the images.
pub const IMAGE_DIR: &str = "images";

/// Directory under the backend root that holds per-image label files.
pub const LABEL_DIR: &str = "labels";

/// Category-name file at the backend root.
pub const LABELS_FILE: &str = "labels.txt";

/// Image extensions included in dataset listings.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Label-file path for an image file name, e.g. `foo.jpg` -> `labels/foo.txt`.
///
/// Only the final extension is replaced, so `a.b.jpg` maps to `labels/a.b.txt`.
pub fn label_path(image_file: &str) -> String {
    let stem = match image_file.rfind('.') {
        Some(dot) => &image_file[..dot],
        None => image_file,
    };
    format!("{}/{}.txt", LABEL_DIR, stem)
}

/// List the image file names (base names, sorted) under `images/`.
///
/// Non-image entries are filtered out by extension, case-insensitively.
pub fn list_images(backend: &dyn Storage) -> Result<Vec<String>, StorageError> {
    let matches = backend.glob(IMAGE_DIR, "*")?;

    let mut files: Vec<String> = matches
        .iter()
        .filter(|path| {
            Path::new(path)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .filter_map(|path| {
            Path::new(path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .collect();

    files.sort();
    log::debug!("found {} images at {}", files.len(), backend.describe());
    Ok(files)
}
