//! Pluggable storage backends.
//!
//! All dataset I/O goes through the [`Storage`] trait so the rest of the
//! crate is indifferent to where files live: a local directory, a remote
//! host reached over SFTP, or nowhere at all ([`DummyStorage`]) before a
//! directory has been chosen. Paths handed to a backend are always
//! forward-relative to its root (`images/foo.jpg`, `labels/foo.txt`).

mod dummy;
mod error;
mod local;
mod sftp;

use std::io::{Read, Write};
use std::sync::Arc;

pub use dummy::DummyStorage;
pub use error::StorageError;
pub use local::LocalStorage;
pub use sftp::SftpStorage;

/// URI prefix selecting the SFTP backend.
pub const SFTP_SCHEME: &str = "sftp://";

/// A storage backend for dataset files.
///
/// Implementations must be safe for concurrent use: scan workers issue
/// independent requests against one shared backend instance.
pub trait Storage: Send + Sync {
    /// Open a file for reading.
    ///
    /// A missing file is reported as [`StorageError::NotFound`].
    fn open(&self, filename: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Open a file for writing, creating it if needed.
    ///
    /// Truncates existing content unless `append` is set. Missing parent
    /// directories are created where the backend supports it.
    fn open_write(&self, filename: &str, append: bool)
    -> Result<Box<dyn Write + Send>, StorageError>;

    /// List paths under `directory` matching a shell-glob `pattern`.
    ///
    /// Results are sorted so callers see a deterministic order regardless of
    /// backend.
    fn glob(&self, directory: &str, pattern: &str) -> Result<Vec<String>, StorageError>;

    /// Human-readable identification of this backend.
    fn describe(&self) -> String;

    /// Release backend resources. No-op for local and dummy storage.
    fn disconnect(&self);
}

/// Resolve a directory string to a backend.
///
/// `sftp://host/path` selects the SFTP backend (construction errors surface
/// to the caller rather than being downgraded to an empty backend); an empty
/// string means no directory has been chosen yet and yields the dummy
/// backend; anything else is treated as a local root.
pub fn connect(directory: &str) -> Result<Arc<dyn Storage>, StorageError> {
    if directory.is_empty() {
        return Ok(Arc::new(DummyStorage));
    }

    if let Some(rest) = directory.strip_prefix(SFTP_SCHEME) {
        let (server, path) = match rest.split_once('/') {
            Some((server, path)) => (server, format!("/{}", path)),
            None => (rest, String::from("/")),
        };
        if server.is_empty() {
            return Err(StorageError::InvalidUri {
                uri: directory.to_string(),
                reason: "missing host".to_string(),
            });
        }
        let backend = SftpStorage::connect(server, &path)?;
        return Ok(Arc::new(backend));
    }

    Ok(Arc::new(LocalStorage::new(directory)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_empty_is_dummy() {
        let backend = connect("").unwrap();
        assert!(matches!(
            backend.open("labels.txt"),
            Err(StorageError::NotConfigured)
        ));
    }

    #[test]
    fn test_connect_local() {
        let backend = connect("/tmp/dataset").unwrap();
        assert_eq!(backend.describe(), "/tmp/dataset");
    }

    #[test]
    fn test_connect_rejects_hostless_uri() {
        assert!(matches!(
            connect("sftp:///data"),
            Err(StorageError::InvalidUri { .. })
        ));
    }
}
