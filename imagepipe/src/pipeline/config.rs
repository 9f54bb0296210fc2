//! Pipeline configuration.
//!
//! This module contains the [`PipelineConfig`] struct and related constants
//! for configuring an [`ImagePipeline`](super::ImagePipeline).

use std::path::PathBuf;

use crate::engine::{DEFAULT_BURST, DEFAULT_RATE};
use crate::loader::HttpLoaderConfig;
use crate::priority::Priority;

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default number of concurrent data loads.
pub const DEFAULT_DATA_LOADING_CONCURRENCY: usize = 6;

/// Default number of concurrent decodes.
pub const DEFAULT_DECODING_CONCURRENCY: usize = 1;

/// Default number of concurrent processor chains.
pub const DEFAULT_PROCESSING_CONCURRENCY: usize = 2;

/// Default memory cache budget (256 MB of pixels).
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Default disk cache budget (1 GB).
pub const DEFAULT_DISK_CACHE_SIZE: usize = 1024 * 1024 * 1024;

/// Default number of partial downloads kept for resuming.
pub const DEFAULT_RESUMABLE_CAPACITY: usize = 32;

/// Default number of terminal outcomes each pool remembers.
pub const DEFAULT_RETAINED_OUTCOMES: usize = 16;

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Token bucket settings for network fetches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained fetch starts per second.
    pub rate: f64,

    /// Fetches that may start back to back.
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
        }
    }
}

/// On-disk cache of encoded data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskCacheConfig {
    pub directory: PathBuf,
    pub max_size_bytes: usize,
}

/// Configuration for the image pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Share one task between requests with equal keys.
    ///
    /// When disabled every request gets private tasks at every layer, with
    /// the same cancellation and priority behavior.
    pub coalescing: bool,

    /// Decode previews from partially downloaded data.
    pub progressive_decoding: bool,

    /// Throttle the start of network fetches. `None` admits every fetch.
    pub rate_limiter: Option<RateLimiterConfig>,

    /// Concurrent data loads.
    pub data_loading_concurrency: usize,

    /// Concurrent decodes.
    pub decoding_concurrency: usize,

    /// Concurrent processor chains.
    pub processing_concurrency: usize,

    /// Priority of requests that do not set one, and of tasks with no
    /// subscribers.
    pub default_priority: Priority,

    /// Memory cache budget in bytes. `None` disables the memory cache.
    pub memory_cache_size: Option<usize>,

    /// Disk cache location and budget. `None` disables the disk cache.
    pub disk_cache: Option<DiskCacheConfig>,

    /// Keep partial downloads so a later fetch can resume them.
    pub resumable_data: bool,

    /// Terminal outcomes each pool remembers for late subscribers.
    pub retained_outcomes: usize,

    /// Settings for the default HTTP loader.
    pub http: HttpLoaderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            coalescing: true,
            progressive_decoding: false,
            rate_limiter: Some(RateLimiterConfig::default()),
            data_loading_concurrency: DEFAULT_DATA_LOADING_CONCURRENCY,
            decoding_concurrency: DEFAULT_DECODING_CONCURRENCY,
            processing_concurrency: DEFAULT_PROCESSING_CONCURRENCY,
            default_priority: Priority::Normal,
            memory_cache_size: Some(DEFAULT_MEMORY_CACHE_SIZE),
            disk_cache: None,
            resumable_data: true,
            retained_outcomes: DEFAULT_RETAINED_OUTCOMES,
            http: HttpLoaderConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalescing = enabled;
        self
    }

    pub fn with_progressive_decoding(mut self, enabled: bool) -> Self {
        self.progressive_decoding = enabled;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Option<RateLimiterConfig>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_data_loading_concurrency(mut self, concurrency: usize) -> Self {
        self.data_loading_concurrency = concurrency;
        self
    }

    pub fn with_decoding_concurrency(mut self, concurrency: usize) -> Self {
        self.decoding_concurrency = concurrency;
        self
    }

    pub fn with_processing_concurrency(mut self, concurrency: usize) -> Self {
        self.processing_concurrency = concurrency;
        self
    }

    pub fn with_default_priority(mut self, priority: Priority) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_memory_cache_size(mut self, size: Option<usize>) -> Self {
        self.memory_cache_size = size;
        self
    }

    pub fn with_disk_cache(mut self, disk_cache: Option<DiskCacheConfig>) -> Self {
        self.disk_cache = disk_cache;
        self
    }

    pub fn with_resumable_data(mut self, enabled: bool) -> Self {
        self.resumable_data = enabled;
        self
    }

    pub fn with_retained_outcomes(mut self, count: usize) -> Self {
        self.retained_outcomes = count;
        self
    }
}

impl From<&crate::config::ConfigFile> for PipelineConfig {
    fn from(file: &crate::config::ConfigFile) -> Self {
        let rate_limiter = file.rate_limiter.enabled.then_some(RateLimiterConfig {
            rate: file.rate_limiter.rate,
            burst: file.rate_limiter.burst,
        });
        let memory_cache_size = file
            .cache
            .memory_enabled
            .then_some(file.cache.memory_size);
        let disk_cache = file.cache.disk_enabled.then(|| DiskCacheConfig {
            directory: file.cache.directory.clone(),
            max_size_bytes: file.cache.disk_size,
        });

        Self {
            coalescing: file.pipeline.coalescing,
            progressive_decoding: file.pipeline.progressive_decoding,
            rate_limiter,
            data_loading_concurrency: file.pipeline.data_loading_concurrency,
            decoding_concurrency: file.pipeline.decoding_concurrency,
            processing_concurrency: file.pipeline.processing_concurrency,
            default_priority: file.pipeline.default_priority,
            memory_cache_size,
            disk_cache,
            resumable_data: file.network.resumable_data,
            retained_outcomes: DEFAULT_RETAINED_OUTCOMES,
            http: HttpLoaderConfig {
                timeout: file.network.timeout,
                connect_timeout: file.network.connect_timeout,
                user_agent: file.network.user_agent.clone(),
                ..HttpLoaderConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert!(config.coalescing);
        assert!(!config.progressive_decoding);
        assert_eq!(config.rate_limiter, Some(RateLimiterConfig::default()));
        assert_eq!(config.data_loading_concurrency, DEFAULT_DATA_LOADING_CONCURRENCY);
        assert_eq!(config.decoding_concurrency, DEFAULT_DECODING_CONCURRENCY);
        assert_eq!(config.processing_concurrency, DEFAULT_PROCESSING_CONCURRENCY);
        assert_eq!(config.default_priority, Priority::Normal);
        assert!(config.disk_cache.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = PipelineConfig::default()
            .with_coalescing(false)
            .with_rate_limiter(None)
            .with_memory_cache_size(None)
            .with_default_priority(Priority::Low);

        assert!(!config.coalescing);
        assert!(config.rate_limiter.is_none());
        assert!(config.memory_cache_size.is_none());
        assert_eq!(config.default_priority, Priority::Low);
    }

    #[test]
    fn test_from_config_file() {
        let mut file = crate::config::ConfigFile::default();
        file.pipeline.coalescing = false;
        file.rate_limiter.enabled = false;
        file.cache.disk_enabled = true;

        let config = PipelineConfig::from(&file);
        assert!(!config.coalescing);
        assert!(config.rate_limiter.is_none());
        let disk = config.disk_cache.unwrap();
        assert_eq!(disk.directory, file.cache.directory);
        assert_eq!(disk.max_size_bytes, file.cache.disk_size);
    }
}
