//! Ordered category-name list loaded from the dataset's `labels.txt`.

use std::io::{BufRead, BufReader};

use crate::dataset::LABELS_FILE;
use crate::storage::Storage;

/// Name used for category indices with no entry in the label file.
pub const UNKNOWN_LABEL: &str = "unknown";

/// The ordered category names for a dataset.
///
/// Line `n` of `labels.txt` names category `n`. Indices past the end of the
/// file resolve to [`UNKNOWN_LABEL`] rather than failing, since label files
/// may reference categories the name list does not cover.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Create a label set from a list of names in index order.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load the label set from `labels.txt` at the backend root.
    ///
    /// A missing or unreadable file yields an empty set (every name falls
    /// back to `"unknown"`); that is logged but not an error, since a dataset
    /// without a name list is still usable.
    pub fn load(backend: &dyn Storage) -> Self {
        let reader = match backend.open(LABELS_FILE) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("no {} at {}: {}", LABELS_FILE, backend.describe(), e);
                return Self::default();
            }
        };

        let mut names = Vec::new();
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(name) => names.push(name.trim_end().to_string()),
                Err(e) => {
                    log::warn!("error reading {}: {}", LABELS_FILE, e);
                    break;
                }
            }
        }
        log::debug!("loaded {} label names", names.len());
        Self { names }
    }

    /// Name for a category index, falling back to `"unknown"`.
    pub fn name(&self, index: usize) -> &str {
        self.names
            .get(index)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    /// Number of named categories.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set has no names at all.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
