//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;
use std::time::Duration;

use crate::priority::Priority;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Scheduling and concurrency settings
    pub pipeline: PipelineSettings,
    /// Token bucket in front of network loads
    pub rate_limiter: RateLimiterSettings,
    /// Memory and disk cache settings
    pub cache: CacheSettings,
    /// HTTP loader settings
    pub network: NetworkSettings,
    /// Log file location
    pub logging: LoggingSettings,
}

/// Scheduling and concurrency configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Share work between equal requests.
    pub coalescing: bool,
    /// Decode previews from partial data.
    pub progressive_decoding: bool,
    /// Maximum concurrent data loads. Default: 6
    pub data_loading_concurrency: usize,
    /// Maximum concurrent decodes. Default: 1
    pub decoding_concurrency: usize,
    /// Maximum concurrent processor chains. Default: 2
    pub processing_concurrency: usize,
    /// Priority of requests that don't set one.
    pub default_priority: Priority,
}

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterSettings {
    pub enabled: bool,
    /// Tokens added per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: u32,
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub memory_enabled: bool,
    /// Memory cache size in bytes
    pub memory_size: usize,
    pub disk_enabled: bool,
    /// Disk cache size in bytes
    pub disk_size: usize,
    /// Disk cache directory
    pub directory: PathBuf,
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    /// Whole-request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Keep partial downloads so they can be resumed.
    pub resumable_data: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory holding the log file
    pub directory: PathBuf,
    /// Log file name
    pub file: String,
}
