//! Byte-budgeted LRU cache for source and generated PDFs

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A cached document and the file name it should be reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPdf {
    pub data: Vec<u8>,
    /// Original file name, e.g. `w9.pdf`
    pub file_name: String,
}

impl CachedPdf {
    pub fn new(data: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            data,
            file_name: file_name.into(),
        }
    }
}

struct CacheInner {
    lru: LruCache<String, CachedPdf>,
    total_bytes: usize,
}

/// Cache manager for PDF data with entry count and byte budget limits
pub struct CacheManager {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl CacheManager {
    /// Create a cache holding at most `capacity` entries and `max_bytes` of PDF data
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store a document, evicting least recently used entries to stay in budget.
    ///
    /// Returns `false` when the document alone exceeds the byte budget and was
    /// not stored.
    pub fn put(&self, key: String, entry: CachedPdf) -> bool {
        let new_size = entry.data.len();
        if new_size > self.max_bytes {
            tracing::debug!(size = new_size, max = self.max_bytes, "PDF too large to cache");
            return false;
        }

        let mut inner = self.inner.lock();
        if let Some(old) = inner.lru.pop(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.data.len());
        }
        while inner.total_bytes + new_size > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.data.len());
                }
                None => break,
            }
        }
        // Count-based eviction inside `put` also frees bytes
        if let Some((_, evicted)) = inner.lru.push(key, entry) {
            inner.total_bytes = inner.total_bytes.saturating_sub(evicted.data.len());
        }
        inner.total_bytes += new_size;
        true
    }

    pub fn get(&self, key: &str) -> Option<CachedPdf> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    /// Total bytes of PDF data currently held
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// Generate a key that does not collide with any stored entry
    pub fn generate_unique_key(&self) -> String {
        let inner = self.inner.lock();
        loop {
            let key = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&key) {
                return key;
            }
        }
    }

    /// Store `entry` under a fresh key and return the key if it was accepted
    pub fn insert(&self, entry: CachedPdf) -> Option<String> {
        let key = self.generate_unique_key();
        self.put(key.clone(), entry).then_some(key)
    }
}
