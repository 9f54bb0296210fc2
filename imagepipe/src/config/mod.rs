//! Configuration file for the pipeline and the command line tool.
//!
//! [`ConfigFile`] mirrors `~/.imagepipe/config.ini` section by section.
//! Convert it with [`PipelineConfig::from`](crate::PipelineConfig) to
//! build a pipeline.
//!
//! # Example
//!
//! ```no_run
//! use imagepipe::config::ConfigFile;
//! use imagepipe::PipelineConfig;
//!
//! let file = ConfigFile::load()?;
//! let config = PipelineConfig::from(&file);
//! # Ok::<(), imagepipe::config::ConfigFileError>(())
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::{
    default_cache_directory, default_log_directory, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_LOG_FILE, DEFAULT_NETWORK_TIMEOUT_SECS,
};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CacheSettings, ConfigFile, LoggingSettings, NetworkSettings, PipelineSettings,
    RateLimiterSettings,
};
pub use size::{format_size, parse_size, Size, SizeParseError};
