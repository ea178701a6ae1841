//! Placeholder backend used before a dataset directory has been chosen.

use std::io::{Read, Write};

use crate::storage::{Storage, StorageError};

/// A backend whose every operation fails with
/// [`StorageError::NotConfigured`].
///
/// Exists so "no backend configured" is a total, crash-free state instead of
/// a nullable reference; the UI can keep calling into the library before a
/// directory has been picked, or after a remote connection failed.
pub struct DummyStorage;

impl Storage for DummyStorage {
    fn open(&self, _filename: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        Err(StorageError::NotConfigured)
    }

    fn open_write(
        &self,
        _filename: &str,
        _append: bool,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        Err(StorageError::NotConfigured)
    }

    fn glob(&self, _directory: &str, _pattern: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::NotConfigured)
    }

    fn describe(&self) -> String {
        "no storage configured".to_string()
    }

    fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_operations_fail() {
        let storage = DummyStorage;
        assert!(matches!(
            storage.open("a.txt"),
            Err(StorageError::NotConfigured)
        ));
        assert!(matches!(
            storage.open_write("a.txt", false),
            Err(StorageError::NotConfigured)
        ));
        assert!(matches!(
            storage.glob("images", "*"),
            Err(StorageError::NotConfigured)
        ));
        assert_eq!(storage.describe(), "no storage configured");
        storage.disconnect();
    }
}
