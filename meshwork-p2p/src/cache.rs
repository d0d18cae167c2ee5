//! Deduplication cache for broadcast messages.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::protocol::MessageId;

/// Remembers which message identities this node has already processed.
///
/// Unbounded by default: identities are kept for the life of the node. A
/// bounded cache forgets the least recently seen identities once full, which
/// reopens a replay window for messages older than the window.
pub struct DedupCache {
    seen: Mutex<LruCache<MessageId, ()>>,
}

impl DedupCache {
    /// Create a cache that never forgets.
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Create a cache holding at most `capacity` identities.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Create a cache bounded by `capacity`, or unbounded for `None`.
    pub fn from_capacity(capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::new(),
        }
    }

    /// Mark `id` as seen. Returns true if it was not seen before.
    ///
    /// Check and insert happen under one lock, so of two concurrent calls
    /// with the same id exactly one returns true.
    pub fn insert(&self, id: MessageId) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(&id) {
            seen.promote(&id);
            return false;
        }
        seen.put(id, ());
        true
    }

    /// Check whether `id` has been seen, without marking it.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.lock().contains(id)
    }

    /// Number of remembered identities.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn id(text: &str) -> MessageId {
        Envelope::new(Payload::text(text)).id()
    }

    #[test]
    fn test_insert_reports_first_sighting_only() {
        let cache = DedupCache::new();

        assert!(cache.insert(id("a")));
        assert!(!cache.insert(id("a")));
        assert!(cache.insert(id("b")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_unbounded_never_forgets() {
        let cache = DedupCache::new();
        for i in 0..5000 {
            cache.insert(id(&i.to_string()));
        }
        assert!(cache.contains(&id("0")));
        assert_eq!(cache.len(), 5000);
    }

    #[test]
    fn test_bounded_eviction() {
        let cache = DedupCache::with_capacity(2);

        cache.insert(id("1"));
        cache.insert(id("2"));
        cache.insert(id("3"));

        // "1" should be evicted
        assert!(!cache.contains(&id("1")));
        assert!(cache.contains(&id("2")));
        assert!(cache.contains(&id("3")));
    }

    #[test]
    fn test_duplicate_refreshes_recency() {
        let cache = DedupCache::with_capacity(2);

        cache.insert(id("1"));
        cache.insert(id("2"));
        assert!(!cache.insert(id("1")));
        cache.insert(id("3"));

        assert!(cache.contains(&id("1")));
        assert!(!cache.contains(&id("2")));
    }

    #[test]
    fn test_concurrent_insert_has_single_winner() {
        let cache = Arc::new(DedupCache::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let target = id("contended");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if cache.insert(target) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
