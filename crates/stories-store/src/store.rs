//! # Story Store
//!
//! The swappable handle in front of the active [`Snapshot`]. Readers grab an
//! `Arc<Snapshot>` and keep it for the whole request; a reload builds the
//! next snapshot off to the side and publishes it with a single pointer swap.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{error, info};

use crate::error::StoreError;
use crate::snapshot::Snapshot;

pub struct StoryStore {
    active: ArcSwap<Snapshot>,
    reloading: AtomicBool,
}

impl StoryStore {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            active: ArcSwap::new(Arc::new(initial)),
            reloading: AtomicBool::new(false),
        }
    }

    /// The current snapshot. Stays valid even if a reload swaps it out.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.active.load_full()
    }

    /// Publish `next` and return the snapshot it replaced.
    #[cfg(test)]
    pub(crate) fn swap(&self, next: Snapshot) -> Arc<Snapshot> {
        self.active.swap(Arc::new(next))
    }

    /// Load `path` into a new snapshot and publish it. Only one reload runs
    /// at a time; on failure the current snapshot stays active.
    pub fn reload(&self, path: &Path) -> Result<Arc<Snapshot>, StoreError> {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Story reload already in progress, skipping");
            return Err(StoreError::ReloadInProgress);
        }

        let outcome = Snapshot::load_json(path).map(Arc::new);
        match &outcome {
            Ok(next) => {
                self.active.store(next.clone());
                info!(rows = next.row_count(), "Story snapshot reloaded");
            }
            Err(e) => {
                error!(error = %e, "Failed to reload stories, keeping current snapshot");
            }
        }

        self.reloading.store(false, Ordering::SeqCst);
        outcome
    }
}
