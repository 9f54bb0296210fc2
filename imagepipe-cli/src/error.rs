//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use imagepipe::config::ConfigFileError;
use imagepipe::error::CacheError;
use imagepipe::BuildError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(ConfigFileError),
    /// Invalid combination of arguments
    Usage(String),
    /// Failed to create the pipeline
    PipelineCreation(BuildError),
    /// One or more images failed to load
    Fetch { failed: usize, total: usize },
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
    /// Failed to encode an image for output
    Encode {
        path: String,
        error: image::ImageError,
    },
    /// Failed to open the disk cache
    Cache(CacheError),
    /// Interrupted with Ctrl+C
    Interrupted,
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Fix the value in the configuration file, or recreate it with:");
                eprintln!("  imagepipe config init --force");
            }
            CliError::PipelineCreation(BuildError::DiskCache(_)) | CliError::Cache(_) => {
                eprintln!();
                eprintln!("Check that the cache directory is writable,");
                eprintln!("or disable the disk cache with disk_enabled = false.");
            }
            _ => {}
        }

        let code = match self {
            CliError::Interrupted => 130,
            CliError::Usage(_) => 2,
            _ => 1,
        };
        process::exit(code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::PipelineCreation(e) => write!(f, "Failed to create pipeline: {}", e),
            CliError::Fetch { failed, total } => {
                write!(f, "{} of {} image(s) failed to load", failed, total)
            }
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
            CliError::Encode { path, error } => {
                write!(f, "Failed to encode '{}': {}", path, error)
            }
            CliError::Cache(e) => write!(f, "Disk cache error: {}", e),
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::PipelineCreation(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            CliError::Encode { error, .. } => Some(error),
            CliError::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<BuildError> for CliError {
    fn from(e: BuildError) -> Self {
        CliError::PipelineCreation(e)
    }
}
