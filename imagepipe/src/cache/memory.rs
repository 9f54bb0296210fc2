//! In-memory image cache with LRU eviction.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;

use super::r#trait::ImageCaching;
use super::stats::CacheStats;
use super::types::ImageCacheKey;

/// Entry in the memory cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    image: Arc<RgbaImage>,
    /// Decoded size in bytes
    cost: usize,
    /// Logical clock value of the last access
    last_accessed: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ImageCacheKey, CacheEntry>,
    size_bytes: usize,
    clock: u64,
    stats: CacheStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Cost-limited memory cache for decoded images.
///
/// Cost is the decoded pixel size. When either the byte limit or the entry
/// limit is exceeded, least recently used entries are evicted. Images larger
/// than the whole cache are never stored.
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    max_size_bytes: usize,
    max_entries: usize,
}

impl MemoryImageCache {
    /// Create a new memory cache with the given size limit.
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size_bytes,
            max_entries: usize::MAX,
        }
    }

    /// Also limit the number of entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn contains(&self, key: &ImageCacheKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entry_count: inner.entries.len(),
            size_bytes: inner.size_bytes,
            ..inner.stats
        }
    }

    /// Evict least recently used entries until both limits hold.
    fn evict_lru(&self, inner: &mut Inner) {
        if inner.size_bytes <= self.max_size_bytes && inner.entries.len() <= self.max_entries {
            return;
        }

        let mut by_age: Vec<(ImageCacheKey, u64)> = inner
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed))
            .collect();
        by_age.sort_by_key(|(_, accessed)| *accessed);

        let mut evicted = 0;
        for (key, _) in by_age {
            if inner.size_bytes <= self.max_size_bytes && inner.entries.len() <= self.max_entries {
                break;
            }
            if let Some(entry) = inner.entries.remove(&key) {
                inner.size_bytes = inner.size_bytes.saturating_sub(entry.cost);
                evicted += 1;
            }
        }

        inner.stats.evictions += evicted;
        tracing::debug!(
            evicted = evicted,
            size_bytes = inner.size_bytes,
            entries = inner.entries.len(),
            "Memory cache eviction"
        );
    }
}

impl ImageCaching for MemoryImageCache {
    fn get(&self, key: &ImageCacheKey) -> Option<Arc<RgbaImage>> {
        let mut inner = self.inner.lock();
        let now = inner.tick();

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_accessed = now;
                let image = Arc::clone(&entry.image);
                inner.stats.hits += 1;
                Some(image)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    fn insert(&self, key: ImageCacheKey, image: Arc<RgbaImage>) {
        let cost = image.as_raw().len();
        if cost > self.max_size_bytes {
            tracing::debug!(key = %key, cost = cost, "Image larger than memory cache, not stored");
            return;
        }

        let mut inner = self.inner.lock();
        let now = inner.tick();
        let entry = CacheEntry {
            image,
            cost,
            last_accessed: now,
        };
        if let Some(old) = inner.entries.insert(key, entry) {
            inner.size_bytes = inner.size_bytes.saturating_sub(old.cost);
        }
        inner.size_bytes += cost;
        inner.stats.writes += 1;

        self.evict_lru(&mut inner);
    }

    fn remove(&self, key: &ImageCacheKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(key) {
            inner.size_bytes = inner.size_bytes.saturating_sub(entry.cost);
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_bytes = 0;
    }
}
