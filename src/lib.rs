//! boxmark - bounding-box annotation storage
//!
//! Persistence and statistics for image bounding-box annotations: a
//! line-oriented label format, pluggable local/SFTP/dummy storage backends,
//! a cached region store, and a concurrent dataset scanner.

pub mod color_utils;
pub mod constants;
pub mod dataset;
pub mod metadata;
pub mod model;
pub mod regions;
pub mod storage;

pub use metadata::Metadata;
pub use model::{LabelSet, Region};
pub use regions::{RegionList, RegionStore};
pub use storage::{Storage, StorageError, connect};
