//! Owner of the current business snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::snapshot::{BusinessSnapshot, SnapshotPatch};
use super::summary::{self, NOT_INITIALIZED_SUMMARY};
use crate::error::ContextError;

/// Holds the active snapshot behind an atomically swapped `Arc`.
///
/// Readers clone the `Arc` and keep a consistent view for as long as they
/// need it; writers never touch a snapshot that has been handed out.
#[derive(Debug)]
pub struct ContextStore {
    current: RwLock<Option<Arc<BusinessSnapshot>>>,
    versions: AtomicU64,
    sample_size: usize,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(summary::DEFAULT_SAMPLE_SIZE)
    }
}

impl ContextStore {
    /// Create an empty store whose digests list `sample_size` entities per
    /// collection.
    #[must_use]
    pub fn new(sample_size: usize) -> Self {
        Self {
            current: RwLock::new(None),
            versions: AtomicU64::new(0),
            sample_size: sample_size.max(1),
        }
    }

    /// Install the first snapshot.
    pub fn initialize(&self, snapshot: BusinessSnapshot) -> Arc<BusinessSnapshot> {
        let installed = self.install(snapshot);
        info!(
            name: "context.initialized",
            version = installed.version,
            clients = installed.clients.len(),
            jobs = installed.jobs.len(),
            "Business context initialized"
        );
        installed
    }

    /// Replace the current snapshot with a freshly fetched one.
    ///
    /// Refreshing an uninitialized store behaves like `initialize`.
    pub fn refresh(&self, snapshot: BusinessSnapshot) -> Arc<BusinessSnapshot> {
        let previous = self.current().ok().map(|s| s.version);
        let installed = self.install(snapshot);
        info!(
            name: "context.refreshed",
            previous_version = ?previous,
            version = installed.version,
            "Business context refreshed"
        );
        installed
    }

    /// The active snapshot.
    pub fn current(&self) -> Result<Arc<BusinessSnapshot>, ContextError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or(ContextError::NotInitialized)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Prompt-sized digest of the active snapshot, or a sentinel when cold.
    #[must_use]
    pub fn summarize(&self) -> String {
        match self.current() {
            Ok(snapshot) => self.summarize_snapshot(&snapshot),
            Err(_) => NOT_INITIALIZED_SUMMARY.to_string(),
        }
    }

    /// Digest of a snapshot the caller already holds.
    #[must_use]
    pub fn summarize_snapshot(&self, snapshot: &BusinessSnapshot) -> String {
        summary::summarize(snapshot, self.sample_size)
    }

    /// Apply a single-entity patch to whatever snapshot is current now.
    ///
    /// The patched copy replaces the current pointer; holders of the old
    /// `Arc` keep seeing the unpatched data.
    pub fn apply_patch(&self, patch: &SnapshotPatch) -> Result<Arc<BusinessSnapshot>, ContextError> {
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let current = slot.as_ref().ok_or(ContextError::NotInitialized)?;
        let patched = Arc::new(patch.apply(current)?);
        let (kind, id) = patch.target();
        debug!(
            entity = kind,
            entity_id = %id,
            version = patched.version,
            revision = patched.revision,
            "Applied snapshot patch"
        );
        *slot = Some(Arc::clone(&patched));
        Ok(patched)
    }

    fn install(&self, mut snapshot: BusinessSnapshot) -> Arc<BusinessSnapshot> {
        snapshot.version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.revision = 0;
        let snapshot = Arc::new(snapshot);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        snapshot
    }
}
