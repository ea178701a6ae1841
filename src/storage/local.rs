//! Local filesystem backend rooted at a directory prefix.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::storage::{Storage, StorageError};

/// Storage backed by a local directory.
///
/// Every path is resolved by joining it under the root prefix. Inputs are
/// trusted (they come from the directory picker or our own layout helpers),
/// so no escape protection beyond normal path joining is applied.
pub struct LocalStorage {
    prefix: PathBuf,
}

impl LocalStorage {
    /// Create a backend rooted at `prefix`. The directory is not required to
    /// exist yet; reads will simply report NotFound.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn full_path(&self, filename: &str) -> PathBuf {
        self.prefix.join(filename)
    }
}

impl Storage for LocalStorage {
    fn open(&self, filename: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let full = self.full_path(filename);
        match File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(filename)),
            Err(e) => Err(e.into()),
        }
    }

    fn open_write(
        &self,
        filename: &str,
        append: bool,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        let full = self.full_path(filename);

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }

        let file = options.open(&full)?;
        Ok(Box::new(file))
    }

    fn glob(&self, directory: &str, pattern: &str) -> Result<Vec<String>, StorageError> {
        let full = self.full_path(directory).join(pattern);
        let full = full.to_string_lossy();

        let mut matches = Vec::new();
        for entry in glob::glob(&full)? {
            match entry {
                Ok(path) => matches.push(path.to_string_lossy().into_owned()),
                Err(e) => log::warn!("skipping unreadable entry under {}: {}", directory, e),
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn describe(&self) -> String {
        self.prefix.display().to_string()
    }

    fn disconnect(&self) {}
}
