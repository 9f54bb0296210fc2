//! Default values and constants for all configuration settings.
//!
//! Contains the `DEFAULT_*` constants that have no home in the pipeline
//! itself and the `ConfigFile::default()` implementation.

use std::path::PathBuf;
use std::time::Duration;

use super::settings::*;
use crate::engine::{DEFAULT_BURST, DEFAULT_RATE};
use crate::loader::DEFAULT_USER_AGENT;
use crate::pipeline::{
    DEFAULT_DATA_LOADING_CONCURRENCY, DEFAULT_DECODING_CONCURRENCY, DEFAULT_DISK_CACHE_SIZE,
    DEFAULT_MEMORY_CACHE_SIZE, DEFAULT_PROCESSING_CONCURRENCY,
};
use crate::priority::Priority;

// =============================================================================
// Network
// =============================================================================

/// Default whole-request timeout in seconds.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Logging
// =============================================================================

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "imagepipe.log";

// =============================================================================
// Directories
// =============================================================================

/// Default disk cache directory (platform cache dir + `imagepipe`).
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("imagepipe")
}

/// Default log directory (`~/.imagepipe/logs`).
pub fn default_log_directory() -> PathBuf {
    super::file::config_directory().join("logs")
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings {
                coalescing: true,
                progressive_decoding: false,
                data_loading_concurrency: DEFAULT_DATA_LOADING_CONCURRENCY,
                decoding_concurrency: DEFAULT_DECODING_CONCURRENCY,
                processing_concurrency: DEFAULT_PROCESSING_CONCURRENCY,
                default_priority: Priority::Normal,
            },
            rate_limiter: RateLimiterSettings {
                enabled: true,
                rate: DEFAULT_RATE,
                burst: DEFAULT_BURST,
            },
            cache: CacheSettings {
                memory_enabled: true,
                memory_size: DEFAULT_MEMORY_CACHE_SIZE,
                disk_enabled: false,
                disk_size: DEFAULT_DISK_CACHE_SIZE,
                directory: default_cache_directory(),
            },
            network: NetworkSettings {
                timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
                connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                resumable_data: true,
            },
            logging: LoggingSettings {
                directory: default_log_directory(),
                file: DEFAULT_LOG_FILE.to_string(),
            },
        }
    }
}
