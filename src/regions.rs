//! Loading, caching, and saving of per-image region annotations.
//!
//! Every image's annotations live in one label file under `labels/`. The
//! [`RegionStore`] front-ends all access to those files with a bounded LRU
//! cache so that repeated loads (cursoring through a dataset, a metadata
//! rescan) do not hit the backend again, and so that a save immediately
//! refreshes what a following load observes.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use crate::constants::REGION_CACHE_CAPACITY;
use crate::dataset;
use crate::model::Region;
use crate::storage::{Storage, StorageError};

/// The regions of one image, tied to its label file path.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionList {
    /// Regions in file order
    pub regions: Vec<Region>,
    /// Backend-relative path of the label file these came from
    pub path: String,
}

impl RegionList {
    fn empty(path: String) -> Self {
        Self {
            regions: Vec::new(),
            path,
        }
    }

    /// Parse a label file's content, one region per line.
    ///
    /// Lines that fail to parse are logged and skipped; one corrupt line
    /// must not hide the rest of the file.
    fn parse(reader: impl BufRead, path: String) -> Result<Self, StorageError> {
        let mut regions = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Region::parse_line(&line) {
                Ok(region) => regions.push(region),
                Err(e) => log::warn!("{}:{}: skipping line: {}", path, number + 1, e),
            }
        }
        Ok(Self { regions, path })
    }

    fn serialize(&self) -> String {
        let mut out = String::new();
        for region in &self.regions {
            out.push_str(&region.to_string());
            out.push('\n');
        }
        out
    }
}

/// Bounded LRU map from label path to regions.
///
/// The recency queue holds (key, stamp) pairs and is cleaned lazily: a
/// touched key is re-pushed with a fresh stamp, and eviction skips queue
/// entries whose stamp no longer matches the map.
struct LruCache {
    entries: HashMap<String, (u64, Vec<Region>)>,
    recency: VecDeque<(String, u64)>,
    capacity: usize,
    stamp: u64,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            capacity,
            stamp: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<Vec<Region>> {
        self.stamp += 1;
        let stamp = self.stamp;
        let (entry_stamp, regions) = self.entries.get_mut(key)?;
        *entry_stamp = stamp;
        let regions = regions.clone();
        self.recency.push_back((key.to_string(), stamp));
        self.compact();
        Some(regions)
    }

    fn insert(&mut self, key: String, regions: Vec<Region>) {
        self.stamp += 1;
        self.recency.push_back((key.clone(), self.stamp));
        self.entries.insert(key, (self.stamp, regions));
        self.evict();
        self.compact();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            let Some((key, stamp)) = self.recency.pop_front() else {
                return;
            };
            // Stale queue entry: the key was touched again later
            if self.entries.get(&key).is_some_and(|(s, _)| *s == stamp) {
                self.entries.remove(&key);
            }
        }
    }

    /// Drop stale queue entries once the queue dwarfs the map, so repeated
    /// hits on a small working set do not grow it without bound.
    fn compact(&mut self) {
        if self.recency.len() <= 2 * self.entries.len().max(1) {
            return;
        }
        let entries = &self.entries;
        self.recency
            .retain(|(key, stamp)| entries.get(key).is_some_and(|(s, _)| s == stamp));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cached access to region label files on a storage backend.
///
/// One store is shared by the UI thread and the scan workers; the cache
/// mutex is held only around map operations, never across backend I/O.
pub struct RegionStore {
    cache: Mutex<LruCache>,
}

impl Default for RegionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionStore {
    pub fn new() -> Self {
        Self::with_capacity(REGION_CACHE_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Load the regions for `image_file`, from cache when possible.
    ///
    /// A missing label file means "no annotations yet" and yields an empty
    /// list; that result is deliberately not cached, so the first annotation
    /// written by another path is picked up on the next load.
    pub fn load(
        &self,
        backend: &dyn Storage,
        image_file: &str,
    ) -> Result<RegionList, StorageError> {
        let path = dataset::label_path(image_file);

        if let Some(regions) = self.lock().get(&path) {
            return Ok(RegionList { regions, path });
        }

        let reader = match backend.open(&path) {
            Ok(reader) => reader,
            Err(StorageError::NotFound { .. }) => {
                log::debug!("no label file at {}, starting empty", path);
                return Ok(RegionList::empty(path));
            }
            Err(e) => return Err(e),
        };

        let list = RegionList::parse(BufReader::new(reader), path)?;
        self.lock().insert(list.path.clone(), list.regions.clone());
        Ok(list)
    }

    /// Write `list` to its label file.
    ///
    /// The cache is refreshed before the write, so concurrent loads observe
    /// the new state as soon as the save is underway.
    pub fn save(&self, backend: &dyn Storage, list: &RegionList) -> Result<(), StorageError> {
        self.lock().insert(list.path.clone(), list.regions.clone());

        let mut writer = backend.open_write(&list.path, false)?;
        writer.write_all(list.serialize().as_bytes())?;
        writer.flush()?;
        log::debug!("saved {} regions to {}", list.regions.len(), list.path);
        Ok(())
    }

    /// Append `region` to the annotations of `image_file`.
    ///
    /// Returns `Ok(false)` without touching storage when the region's
    /// geometry is invalid.
    pub fn add_region(
        &self,
        backend: &dyn Storage,
        image_file: &str,
        region: Region,
    ) -> Result<bool, StorageError> {
        if !region.is_valid() {
            log::warn!("ignoring invalid region for {}: {}", image_file, region);
            return Ok(false);
        }

        let mut list = self.load(backend, image_file)?;
        list.regions.push(region);
        self.save(backend, &list)?;
        Ok(true)
    }

    /// Remove the region at `index` from the annotations of `image_file`,
    /// preserving the order of the rest.
    ///
    /// Returns `Ok(false)` when the index is out of range.
    pub fn remove_region(
        &self,
        backend: &dyn Storage,
        image_file: &str,
        index: usize,
    ) -> Result<bool, StorageError> {
        let mut list = self.load(backend, image_file)?;
        if index >= list.regions.len() {
            log::warn!(
                "no region {} to remove from {} ({} present)",
                index,
                list.path,
                list.regions.len()
            );
            return Ok(false);
        }

        list.regions.remove(index);
        self.save(backend, &list)?;
        Ok(true)
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.lock().len()
    }
}
