//! Dataset-wide annotation statistics.
//!
//! A scan walks every image's label file through the shared [`RegionStore`]
//! with a pool of worker threads, folding per-file counts into one
//! [`Metadata`] value. Backends throttle nothing themselves, so the pool
//! size is the only bound on concurrent requests.

use std::sync::Mutex;
use std::sync::mpsc;
use std::thread;

use crate::constants::SCAN_WORKERS;
use crate::model::LabelSet;
use crate::regions::RegionStore;
use crate::storage::{Storage, StorageError};

/// Aggregated annotation counts for a dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Number of images in the dataset
    pub total: usize,
    /// Images whose label file was inspected (present or absent)
    pub scanned: usize,
    /// Images with at least one region
    pub categorised: usize,
    /// Regions across all images
    pub total_regions: usize,
    /// Regions per category index; out-of-range categories are counted in
    /// `total_regions` only
    pub category_totals: Vec<usize>,
}

impl Metadata {
    fn new(total: usize, category_count: usize) -> Self {
        Self {
            total,
            category_totals: vec![0; category_count],
            ..Self::default()
        }
    }

    /// Fold one image's counts in.
    fn record(&mut self, categories: &[u32]) {
        self.scanned += 1;
        if categories.is_empty() {
            return;
        }
        self.categorised += 1;
        self.total_regions += categories.len();
        for &category in categories {
            if let Some(slot) = self.category_totals.get_mut(category as usize) {
                *slot += 1;
            }
        }
    }

    /// Share of images with at least one region, in percent.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.categorised as f64 / self.total as f64 * 100.0
    }

    /// Share of images actually inspected, in percent.
    pub fn scanned_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.scanned as f64 / self.total as f64 * 100.0
    }

    /// One-line progress summary.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} images annotated ({:.1}%), {} regions, {:.1}% scanned",
            self.categorised,
            self.total,
            self.percent(),
            self.total_regions,
            self.scanned_percent()
        )
    }

    /// Per-category breakdown, one line per category with a nonzero count.
    pub fn category_summary(&self, labels: &LabelSet) -> String {
        let mut out = String::new();
        for (index, &count) in self.category_totals.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let share = count as f64 / self.total_regions as f64 * 100.0;
            out.push_str(&format!(
                "  {}: {} ({:.1}%)\n",
                labels.name(index),
                count,
                share
            ));
        }
        out
    }
}

/// Scan the label files of `files` and aggregate their region counts.
///
/// Uses up to [`SCAN_WORKERS`] threads pulling file names from a shared
/// queue. Per-file failures other than "no label file yet" are logged and
/// leave `scanned` short; a fatal backend error (unconfigured backend,
/// broken connection) aborts the scan and is returned.
pub fn scan(
    backend: &dyn Storage,
    store: &RegionStore,
    files: &[String],
    category_count: usize,
) -> Result<Metadata, StorageError> {
    let aggregate = Mutex::new(Metadata::new(files.len(), category_count));
    let fatal: Mutex<Option<StorageError>> = Mutex::new(None);

    let (sender, receiver) = mpsc::channel::<&String>();
    for file in files {
        // Receiver outlives the loop, so send cannot fail here
        let _ = sender.send(file);
    }
    drop(sender);
    let queue = Mutex::new(receiver);

    let workers = SCAN_WORKERS.min(files.len().max(1));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let Ok(file) = lock_clean(&queue).recv() else {
                        return;
                    };
                    if lock_clean(&fatal).is_some() {
                        // Drain the queue so all workers stop promptly
                        continue;
                    }

                    match store.load(backend, file) {
                        Ok(list) => {
                            let categories: Vec<u32> =
                                list.regions.iter().map(|r| r.category).collect();
                            lock_clean(&aggregate).record(&categories);
                        }
                        Err(e) if e.is_fatal() => {
                            log::error!("aborting scan: {}", e);
                            let mut slot = lock_clean(&fatal);
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                        Err(e) => {
                            log::warn!("skipping {} during scan: {}", file, e);
                        }
                    }
                }
            });
        }
    });

    if let Some(e) = lock_clean(&fatal).take() {
        return Err(e);
    }
    let meta = lock_clean(&aggregate).clone();
    Ok(meta)
}

/// Lock a mutex, recovering the data from a poisoned lock.
fn lock_clean<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DummyStorage, LocalStorage};
    use std::fs;
    use tempfile::TempDir;

    fn dataset(labels: &[(&str, &str)]) -> (TempDir, LocalStorage) {
        let tmp = TempDir::new().expect("tmpdir");
        fs::create_dir_all(tmp.path().join("labels")).expect("mkdir");
        for (name, content) in labels {
            fs::write(tmp.path().join("labels").join(name), content).expect("write");
        }
        let storage = LocalStorage::new(tmp.path());
        (tmp, storage)
    }

    #[test]
    fn test_scan_counts_regions_and_categories() {
        let (_tmp, storage) = dataset(&[
            ("a.txt", "0 0.5 0.5 0.1 0.1\n1 0.2 0.2 0.1 0.1\n"),
            ("b.txt", "1 0.5 0.5 0.1 0.1\n"),
        ]);
        let store = RegionStore::new();
        let files = vec![
            "a.jpg".to_string(),
            "b.jpg".to_string(),
            "c.jpg".to_string(), // no label file
        ];

        let meta = scan(&storage, &store, &files, 3).expect("scan");
        assert_eq!(meta.total, 3);
        assert_eq!(meta.scanned, 3);
        assert_eq!(meta.categorised, 2);
        assert_eq!(meta.total_regions, 3);
        assert_eq!(meta.category_totals, vec![1, 2, 0]);
    }

    #[test]
    fn test_scan_empty_dataset() {
        let (_tmp, storage) = dataset(&[]);
        let store = RegionStore::new();

        let meta = scan(&storage, &store, &[], 2).expect("scan");
        assert_eq!(meta, Metadata::new(0, 2));
        assert_eq!(meta.percent(), 0.0);
    }

    #[test]
    fn test_scan_fails_fast_on_unconfigured_backend() {
        let store = RegionStore::new();
        let files = vec!["a.jpg".to_string(), "b.jpg".to_string()];

        let result = scan(&DummyStorage, &store, &files, 2);
        assert!(matches!(result, Err(StorageError::NotConfigured)));
    }

    #[test]
    fn test_out_of_range_category_counts_in_total_only() {
        let (_tmp, storage) = dataset(&[("a.txt", "7 0.5 0.5 0.1 0.1\n")]);
        let store = RegionStore::new();
        let files = vec!["a.jpg".to_string()];

        let meta = scan(&storage, &store, &files, 2).expect("scan");
        assert_eq!(meta.total_regions, 1);
        assert_eq!(meta.category_totals, vec![0, 0]);
    }

    #[test]
    fn test_scan_many_files_exercises_worker_pool() {
        let entries: Vec<(String, &str)> = (0..200)
            .map(|i| (format!("img{:03}.txt", i), "0 0.5 0.5 0.1 0.1\n"))
            .collect();
        let refs: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, c)| (n.as_str(), *c))
            .collect();
        let (_tmp, storage) = dataset(&refs);
        let store = RegionStore::new();
        let files: Vec<String> = (0..200).map(|i| format!("img{:03}.jpg", i)).collect();

        let meta = scan(&storage, &store, &files, 1).expect("scan");
        assert_eq!(meta.scanned, 200);
        assert_eq!(meta.categorised, 200);
        assert_eq!(meta.total_regions, 200);
    }

    #[test]
    fn test_summary_formatting() {
        let mut meta = Metadata::new(4, 2);
        meta.record(&[0, 1]);
        meta.record(&[]);
        assert_eq!(
            meta.summary(),
            "1/4 images annotated (25.0%), 2 regions, 50.0% scanned"
        );

        let labels = LabelSet::new(vec!["cat".into(), "dog".into()]);
        assert_eq!(
            meta.category_summary(&labels),
            "  cat: 1 (50.0%)\n  dog: 1 (50.0%)\n"
        );
    }
}
