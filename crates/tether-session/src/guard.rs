//! Guard against resurrecting sessions that were just deleted.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded set of recently invalidated session ids.
///
/// When full, the oldest id is forgotten first.
#[derive(Debug)]
pub struct RecentlyInvalidated {
    ids: Mutex<LruCache<String, ()>>,
}

impl RecentlyInvalidated {
    /// Create a guard remembering at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ids: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Remember `id` as invalidated.
    pub fn insert(&self, id: &str) {
        self.ids.lock().put(id.to_string(), ());
    }

    /// Whether `id` was recently invalidated.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    /// Forget `id` (it was created again).
    pub fn remove(&self, id: &str) {
        self.ids.lock().pop(id);
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    pub fn clear(&self) {
        self.ids.lock().clear();
    }
}
