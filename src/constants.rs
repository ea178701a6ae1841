//! Shared constants for geometry validation, caching, and scanning.

/// Tolerance on the box-edge containment checks, absorbing float round-trip
/// error from saved label files. Center and size bounds are strict.
pub const GEOMETRY_EPSILON: f64 = 1e-4;

/// Minimum normalized width/height for a region. Anything smaller is noise
/// from a stray click, not a usable annotation.
pub const MIN_REGION_EXTENT: f64 = 5e-4;

/// Maximum number of label files kept in the region cache.
pub const REGION_CACHE_CAPACITY: usize = 100_000;

/// Number of scan worker threads. The scan is bound by per-file I/O latency
/// (especially over a network backend), not CPU, so the pool is sized well
/// past the core count.
pub const SCAN_WORKERS: usize = 50;
