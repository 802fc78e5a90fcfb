use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Modules referenced at least this many times are worth preloading.
pub const MIN_FREQUENCY: usize = 2;

/// Shared, read-mostly cache of module texts.
///
/// Lookups take a read lock; inserts serialize on the write lock. A module is
/// read from disk outside the lock, so two threads may read the same file,
/// but only the first insert is kept.
#[derive(Debug, Default)]
pub struct ModuleCache {
    modules: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<str>> {
        self.modules.read().get(path).cloned()
    }

    /// Cached text of `path`, reading it on first use.
    pub fn load(&self, path: &Path) -> std::io::Result<Arc<str>> {
        if let Some(text) = self.get(path) {
            return Ok(text);
        }
        let text: Arc<str> = std::fs::read_to_string(path)?.into();
        let mut modules = self.modules.write();
        Ok(Arc::clone(modules.entry(path.to_path_buf()).or_insert(text)))
    }

    /// Load every readable module in `paths`; returns how many are now cached.
    pub fn preload<I: IntoIterator<Item = PathBuf>>(&self, paths: I) -> usize {
        for path in paths {
            if let Err(err) = self.load(&path) {
                debug!(path = %path.display(), %err, "module not preloaded");
            }
        }
        self.len()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Modules used by at least `min_frequency` comparisons in the snapshot, sorted.
///
/// A symbol counts once per side whose build succeeded.
pub fn modules_to_cache(snapshot: &Snapshot, min_frequency: usize) -> Vec<PathBuf> {
    let mut counts: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for entry in snapshot.iterate() {
        for module in [entry.old.module(), entry.new.module()].into_iter().flatten() {
            *counts.entry(module.llvm().to_path_buf()).or_default() += 1;
        }
    }
    counts.into_iter().filter(|(_, count)| *count >= min_frequency).map(|(path, _)| path).collect()
}
