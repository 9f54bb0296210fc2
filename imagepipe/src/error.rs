//! Error types for the image pipeline.
//!
//! [`PipelineError`] is the only error a caller ever receives in a finished
//! event. Collaborator failures are wrapped in their own types
//! ([`DataLoadError`], [`DecodeError`], [`ProcessError`]) without
//! reinterpretation so callers can inspect the underlying cause.
//!
//! Every error here is `Clone`: a failure in a shared task is delivered to
//! each of its subscribers.

use std::sync::Arc;

use thiserror::Error;

/// Boxed collaborator error that can be shared between subscribers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of an image or data request.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The pipeline was invalidated before or while the request ran
    #[error("Pipeline has been invalidated")]
    PipelineInvalidated,

    /// The data loader or producer failed
    #[error("Data loading failed: {0}")]
    DataLoadingFailed(#[from] DataLoadError),

    /// The decoder rejected the data
    #[error("Decoding failed: {0}")]
    DecodingFailed(#[from] DecodeError),

    /// A processor failed
    #[error("Processing failed in '{processor}': {source}")]
    ProcessingFailed {
        /// Identifier of the failing processor
        processor: String,
        /// The processor's error
        #[source]
        source: ProcessError,
    },

    /// The request was cancelled before it produced a result
    #[error("Request was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Returns true if this error came from a collaborator rather than from
    /// the pipeline's own lifecycle.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::DataLoadingFailed(_)
                | PipelineError::DecodingFailed(_)
                | PipelineError::ProcessingFailed { .. }
        )
    }
}

/// Failure reported by a data loader or producer.
#[derive(Debug, Clone, Error)]
pub enum DataLoadError {
    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
    },

    /// The request could not be sent or the body could not be read
    #[error("Request to {url} failed: {source}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying transport error
        #[source]
        source: SharedError,
    },

    /// The source finished without producing any bytes
    #[error("Response body was empty")]
    Empty,

    /// Failure from a caller-supplied loader or producer
    #[error(transparent)]
    Custom(SharedError),
}

impl DataLoadError {
    /// Wraps an arbitrary collaborator error.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DataLoadError::Custom(Arc::new(error))
    }

    /// Wraps a plain message.
    pub fn message(message: impl Into<String>) -> Self {
        DataLoadError::Custom(Arc::new(MessageError(message.into())))
    }
}

/// Failure reported by an image decoder.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The `image` crate rejected the data
    #[error(transparent)]
    Image(Arc<image::ImageError>),

    /// The decoder could not produce an image from complete data
    #[error("Data is not a supported image ({len} bytes)")]
    Unsupported {
        /// Length of the rejected data
        len: usize,
    },

    /// The decoder panicked or its worker was lost
    #[error("Decoder worker failed: {0}")]
    Worker(String),

    /// Failure from a caller-supplied decoder
    #[error(transparent)]
    Custom(SharedError),
}

impl From<image::ImageError> for DecodeError {
    fn from(error: image::ImageError) -> Self {
        DecodeError::Image(Arc::new(error))
    }
}

/// Failure reported by an image processor.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The processor rejected its input
    #[error("{0}")]
    InvalidInput(String),

    /// The processor panicked or its worker was lost
    #[error("Processor worker failed: {0}")]
    Worker(String),

    /// Failure from a caller-supplied processor
    #[error(transparent)]
    Custom(SharedError),
}

impl ProcessError {
    /// Wraps an arbitrary collaborator error.
    pub fn custom<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProcessError::Custom(Arc::new(error))
    }
}

/// Failure of a cache collaborator.
///
/// Cache errors never fail a request: a failed read is treated as a miss and
/// a failed write is logged and dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The entry does not fit in the cache at all
    #[error("Entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    TooLarge {
        /// Entry size in bytes
        size: usize,
        /// Cache capacity in bytes
        capacity: usize,
    },
}

/// Failure to construct a pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The default HTTP client could not be built
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// Pipelines must be created inside a tokio runtime
    #[error("No tokio runtime is running")]
    NoRuntime,

    /// The disk cache directory could not be prepared
    #[error("Failed to open disk cache: {0}")]
    DiskCache(#[source] CacheError),
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_failure_classification() {
        assert!(PipelineError::DataLoadingFailed(DataLoadError::Empty).is_collaborator_failure());
        assert!(
            PipelineError::DecodingFailed(DecodeError::Unsupported { len: 3 })
                .is_collaborator_failure()
        );
        assert!(!PipelineError::PipelineInvalidated.is_collaborator_failure());
        assert!(!PipelineError::Cancelled.is_collaborator_failure());
    }

    #[test]
    fn test_custom_error_is_preserved() {
        let err = DataLoadError::message("disk on fire");
        assert_eq!(err.to_string(), "disk on fire");

        let wrapped = PipelineError::from(err);
        assert_eq!(wrapped.to_string(), "Data loading failed: disk on fire");
    }

    #[test]
    fn test_processing_error_names_processor() {
        let err = PipelineError::ProcessingFailed {
            processor: "resize(10x10)".to_string(),
            source: ProcessError::InvalidInput("zero width".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Processing failed in 'resize(10x10)': zero width"
        );
    }
}
