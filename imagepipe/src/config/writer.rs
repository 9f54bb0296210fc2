//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    format!(
        r#"[pipeline]
; Share downloads, decodes and processing between equal requests (default: true)
coalescing = {}
; Decode previews from partially downloaded data (default: false)
progressive_decoding = {}
; Maximum concurrent data loads (default: 6)
data_loading_concurrency = {}
; Maximum concurrent decodes (default: 1)
decoding_concurrency = {}
; Maximum concurrent processor chains (default: 2)
processing_concurrency = {}
; Priority of requests that don't set one:
;   very_low, low, normal, high, very_high
default_priority = {}

[rate_limiter]
; Token bucket in front of network loads. Cache hits are never limited.
enabled = {}
; Tokens added per second (default: 80)
rate = {}
; Bucket capacity (default: 25)
burst = {}

[cache]
; In-memory cache of decoded and processed images
memory_enabled = {}
; Supports: KB, MB, GB suffixes (e.g., 128MB, 1GB)
memory_size = {}
; On-disk cache of downloaded data
disk_enabled = {}
disk_size = {}
; If empty, defaults to the platform cache directory
directory = {}

[network]
; Whole-request timeout in seconds (default: 60)
timeout = {}
; Connect timeout in seconds (default: 10)
connect_timeout = {}
user_agent = {}
; Keep partial downloads so an interrupted load can resume (default: true)
resumable_data = {}

[logging]
; Directory holding the log file (default: ~/.imagepipe/logs)
directory = {}
file = {}
"#,
        config.pipeline.coalescing,
        config.pipeline.progressive_decoding,
        config.pipeline.data_loading_concurrency,
        config.pipeline.decoding_concurrency,
        config.pipeline.processing_concurrency,
        config.pipeline.default_priority,
        config.rate_limiter.enabled,
        config.rate_limiter.rate,
        config.rate_limiter.burst,
        config.cache.memory_enabled,
        format_size(config.cache.memory_size),
        config.cache.disk_enabled,
        format_size(config.cache.disk_size),
        path_to_string(&config.cache.directory),
        config.network.timeout.as_secs(),
        config.network.connect_timeout.as_secs(),
        config.network.user_agent,
        config.network.resumable_data,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Convert a path to a string, replacing home directory with ~.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
