//! CLI runner for common setup and operations.
//!
//! Encapsulates configuration loading, logging initialization, and pipeline
//! creation to reduce duplication across command handlers.

use std::path::{Path, PathBuf};

use imagepipe::config::ConfigFile;
use imagepipe::logging::{init_logging, LoggingGuard};
use imagepipe::{ImagePipeline, PipelineConfig};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// Reads `config_path` if given, otherwise `~/.imagepipe/config.ini`.
    /// A missing file means defaults.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = load_config(config_path)?;

        let logging_guard = init_logging(&config.logging.directory, &config.logging.file)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("imagepipe v{}", imagepipe::VERSION);
        info!(log_file = %self.logging_guard.path().display(), "imagepipe CLI: {} command", command);
    }

    /// Create a pipeline from the loaded configuration after applying
    /// `adjust`.
    ///
    /// Must be called from within the tokio runtime.
    pub fn create_pipeline(
        &self,
        adjust: impl FnOnce(PipelineConfig) -> PipelineConfig,
    ) -> Result<ImagePipeline, CliError> {
        let config = adjust(PipelineConfig::from(&self.config));
        ImagePipeline::new(config)
            .map_err(CliError::PipelineCreation)
            .inspect(|_| info!("Pipeline created successfully"))
    }
}

/// Load configuration without touching logging.
pub fn load_config(config_path: Option<&Path>) -> Result<ConfigFile, CliError> {
    match config_path {
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

/// Resolve the configuration file path shown and written by `config`.
pub fn resolve_config_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(imagepipe::config::config_file_path)
}
