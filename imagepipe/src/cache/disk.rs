//! Disk cache for encoded data with LRU eviction.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::path::{cache_file_name, cache_path};
use super::r#trait::DataCaching;
use super::stats::CacheStats;
use crate::error::CacheError;

/// Eviction brings the cache down to this fraction of its limit.
const EVICTION_TARGET: f64 = 0.9;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: usize,
    last_used: SystemTime,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, IndexEntry>,
    size_bytes: usize,
    stats: CacheStats,
}

/// Persistent cache of encoded image data.
///
/// Each entry is one file named by the SHA-256 of its key. The index is
/// rebuilt from the directory on startup; recency comes from file mtimes
/// and is refreshed on every hit.
pub struct DiskDataCache {
    cache_dir: PathBuf,
    index: Mutex<Index>,
    max_size_bytes: usize,
}

impl DiskDataCache {
    /// Open (or create) a disk cache at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>, max_size_bytes: usize) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let cache = Self {
            cache_dir,
            index: Mutex::new(Index::default()),
            max_size_bytes,
        };
        cache.scan_cache_dir()?;

        let victims = cache.select_victims();
        for path in victims {
            let _ = fs::remove_file(path);
        }

        Ok(cache)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn entry_count(&self) -> usize {
        self.index.lock().entries.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.index.lock().size_bytes
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.lock().entries.contains_key(&cache_file_name(key))
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            entry_count: index.entries.len(),
            size_bytes: index.size_bytes,
            ..index.stats
        }
    }

    /// Delete every entry.
    pub async fn clear(&self) {
        let names: Vec<String> = {
            let mut index = self.index.lock();
            index.size_bytes = 0;
            index.entries.drain().map(|(name, _)| name).collect()
        };
        for name in names {
            let _ = tokio::fs::remove_file(cache_path(&self.cache_dir, &name)).await;
        }
    }

    /// Build the index from files already on disk.
    fn scan_cache_dir(&self) -> Result<(), CacheError> {
        let mut index = self.index.lock();

        for shard in fs::read_dir(&self.cache_dir)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !is_entry_name(&name) {
                    continue;
                }
                if let Ok(metadata) = entry.metadata() {
                    let size = metadata.len() as usize;
                    let last_used = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    index.size_bytes += size;
                    index.entries.insert(name, IndexEntry { size, last_used });
                }
            }
        }

        info!(
            dir = %self.cache_dir.display(),
            entries = index.entries.len(),
            size_bytes = index.size_bytes,
            "Disk cache index built"
        );
        Ok(())
    }

    /// Remove least recently used entries from the index until the cache is
    /// under its eviction target. Returns the files to delete.
    fn select_victims(&self) -> Vec<PathBuf> {
        let mut index = self.index.lock();
        if index.size_bytes <= self.max_size_bytes {
            return Vec::new();
        }

        let target = (self.max_size_bytes as f64 * EVICTION_TARGET) as usize;
        let mut by_age: Vec<(String, IndexEntry)> = index
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), *entry))
            .collect();
        by_age.sort_by_key(|(_, entry)| entry.last_used);

        let mut victims = Vec::new();
        for (name, entry) in by_age {
            if index.size_bytes <= target {
                break;
            }
            index.entries.remove(&name);
            index.size_bytes = index.size_bytes.saturating_sub(entry.size);
            victims.push(cache_path(&self.cache_dir, &name));
        }

        index.stats.evictions += victims.len() as u64;
        debug!(
            evicted = victims.len(),
            size_bytes = index.size_bytes,
            "Disk cache eviction"
        );
        victims
    }

    async fn read(&self, key: &str) -> Option<Bytes> {
        let name = cache_file_name(key);
        if !self.index.lock().entries.contains_key(&name) {
            self.index.lock().stats.misses += 1;
            return None;
        }

        let path = cache_path(&self.cache_dir, &name);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let mut index = self.index.lock();
                if let Some(entry) = index.entries.get_mut(&name) {
                    entry.last_used = SystemTime::now();
                }
                index.stats.hits += 1;
                Some(Bytes::from(data))
            }
            Err(e) => {
                debug!(key = key, error = %e, "Disk cache entry unreadable, dropping");
                let mut index = self.index.lock();
                if let Some(entry) = index.entries.remove(&name) {
                    index.size_bytes = index.size_bytes.saturating_sub(entry.size);
                }
                index.stats.misses += 1;
                None
            }
        }
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<(), CacheError> {
        if data.len() > self.max_size_bytes {
            return Err(CacheError::TooLarge {
                size: data.len(),
                capacity: self.max_size_bytes,
            });
        }

        let name = cache_file_name(key);
        let path = cache_path(&self.cache_dir, &name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial file
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        {
            let mut index = self.index.lock();
            let entry = IndexEntry {
                size: data.len(),
                last_used: SystemTime::now(),
            };
            if let Some(old) = index.entries.insert(name, entry) {
                index.size_bytes = index.size_bytes.saturating_sub(old.size);
            }
            index.size_bytes += data.len();
            index.stats.writes += 1;
        }

        for victim in self.select_victims() {
            if let Err(e) = tokio::fs::remove_file(&victim).await {
                warn!(path = %victim.display(), error = %e, "Failed to delete evicted cache file");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) {
        let name = cache_file_name(key);
        let removed = {
            let mut index = self.index.lock();
            let removed = index.entries.remove(&name);
            if let Some(entry) = removed {
                index.size_bytes = index.size_bytes.saturating_sub(entry.size);
            }
            removed.is_some()
        };
        if removed {
            let _ = tokio::fs::remove_file(cache_path(&self.cache_dir, &name)).await;
        }
    }
}

impl DataCaching for DiskDataCache {
    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<Bytes>> + Send + 'a>> {
        Box::pin(self.read(key))
    }

    fn store<'a>(
        &'a self,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + 'a>> {
        Box::pin(self.write(key, data))
    }

    fn remove<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.delete(key))
    }
}

fn is_entry_name(name: &str) -> bool {
    name.len() == 64 && name.chars().all(|c| c.is_ascii_hexdigit())
}
