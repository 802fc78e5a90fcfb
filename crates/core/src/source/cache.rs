use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// Keyed memo table with single-flight semantics.
///
/// The first caller for a key runs the producer; callers arriving while it runs
/// block on the same cell and receive a clone of the published value. A key's
/// producer never runs twice, including when it produced a failure.
pub struct SingleFlight<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceLock<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the published value for `key`, running `produce` if nobody has yet.
    pub fn get_or_run<F>(&self, key: &K, produce: F) -> V
    where
        F: FnOnce() -> V,
    {
        // Table lock covers the cell lookup only; the producer runs under the cell's guard.
        let cell = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        cell.get_or_init(produce).clone()
    }

    /// Published value for `key`, if its producer has finished.
    pub fn get(&self, key: &K) -> Option<V> {
        let cell = self.slots.lock().get(key).cloned()?;
        cell.get().cloned()
    }

    /// Number of keys that have been requested.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all finished entries.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(k, cell)| cell.get().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}
