use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use boxmark::storage::DummyStorage;
use boxmark::{LabelSet, RegionStore, Storage, connect, dataset, metadata};

/// Summarize the annotation state of an image dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Dataset root: a local path or sftp://server/path. Empty means no
    /// storage is configured yet.
    #[arg(short, long, default_value = "")]
    directory: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let backend: Arc<dyn Storage> = match connect(&args.directory) {
        Ok(backend) => backend,
        Err(e) => {
            // Stay usable without a backend, matching the in-app behavior
            // when a connection attempt fails
            log::error!("could not connect to {}: {}", args.directory, e);
            Arc::new(DummyStorage)
        }
    };
    log::info!("using storage: {}", backend.describe());

    let labels = LabelSet::load(backend.as_ref());
    let files = dataset::list_images(backend.as_ref())?;
    log::info!("{} images, {} label names", files.len(), labels.len());

    let store = RegionStore::new();
    let meta = metadata::scan(backend.as_ref(), &store, &files, labels.len())?;

    println!("{}", meta.summary());
    let breakdown = meta.category_summary(&labels);
    if !breakdown.is_empty() {
        print!("{}", breakdown);
    }

    backend.disconnect();
    Ok(())
}
