pub mod daemon;
pub mod portal;
pub mod reconcile;
pub mod reports;
pub mod send;
pub mod token;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use rudi_core::config;
use rudi_core::store::{FileStore, Store};
use rudi_portal::SyncEngine;

pub(crate) fn home() -> Result<PathBuf> {
    config::home().context("could not determine home directory")
}

/// Engine over the document store in `home` and the configured Portal.
pub(crate) fn engine(home: &Path) -> Result<SyncEngine> {
    let config = config::load_at(home).context("failed to load node configuration")?;
    let store: Arc<dyn Store> = Arc::new(FileStore::new(home));
    Ok(SyncEngine::with_http(config.portal, store))
}

/// One-shot commands run their async work on a short-lived runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
