//! Live replacement of the backing store.
//!
//! A swap opens and pings the replacement before touching the live handle,
//! so a bad file leaves the current store serving. Readers holding the old
//! `Arc<Store>` finish against it; the old store is dropped after the grace
//! period once the last reader lets go, and its files are removed when the
//! path changed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use campusbot_shared::{CampusBotError, RequestContext, Result};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::{Store, StoreOptions};

const RELEASE_POLL: Duration = Duration::from_millis(50);

/// Sidecar files SQLite may leave next to the main database file.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

pub struct HotSwap {
    current: RwLock<Arc<Store>>,
    swap_lock: Mutex<()>,
    grace: Duration,
}

impl HotSwap {
    pub fn new(store: Store, grace: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
            swap_lock: Mutex::new(()),
            grace,
        }
    }

    /// The live store. Cheap: one read lock and an `Arc` clone.
    pub async fn current(&self) -> Arc<Store> {
        self.current.read().await.clone()
    }

    /// Replace the live store with one opened at `new_path`, using the same
    /// options otherwise.
    ///
    /// Returns a handle to the background task that retires the old store.
    #[instrument(skip_all, fields(path = %new_path.as_ref().display()))]
    pub async fn swap(
        &self,
        ctx: &RequestContext,
        new_path: impl AsRef<Path>,
    ) -> Result<JoinHandle<()>> {
        let _serialized = ctx.run(async { Ok(self.swap_lock.lock().await) }).await?;

        let old_options = self.current().await.options().clone();
        let options = StoreOptions {
            path: new_path.as_ref().to_string_lossy().into_owned(),
            ..old_options
        };

        let replacement = ctx.run(Store::open(options)).await?;
        replacement.ping(ctx).await.map_err(|e| {
            CampusBotError::Unavailable(format!("replacement store failed ping: {e}"))
        })?;

        let new_path = replacement.path();
        let old = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, Arc::new(replacement))
        };
        tracing::info!("store swapped");

        Ok(tokio::spawn(retire(old, new_path, self.grace)))
    }
}

/// Wait out the grace period and any remaining readers, then close the old
/// store and delete its files if they are no longer in use.
async fn retire(old: Arc<Store>, new_path: Option<PathBuf>, grace: Duration) {
    tokio::time::sleep(grace).await;

    let mut waited = false;
    while Arc::strong_count(&old) > 1 {
        if !waited {
            tracing::debug!(
                holders = Arc::strong_count(&old) - 1,
                "waiting for readers of retired store"
            );
            waited = true;
        }
        tokio::time::sleep(RELEASE_POLL).await;
    }

    let old_path = old.path();
    drop(old);

    let Some(old_path) = old_path else {
        return;
    };
    if new_path.as_deref() == Some(old_path.as_path()) {
        return;
    }
    remove_store_files(&old_path);
}

fn remove_store_files(path: &Path) {
    let mut files = vec![path.to_path_buf()];
    for suffix in SIDECAR_SUFFIXES {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }

    for file in files {
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::debug!(file = %file.display(), "removed retired store file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                file = %file.display(),
                error = %e,
                "failed to remove retired store file"
            ),
        }
    }
}
