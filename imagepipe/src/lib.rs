//! imagepipe - Coalescing image loading pipeline
//!
//! Loads images from URLs or custom producers, decodes them, runs
//! processors and caches the results. Equal work requested by several
//! callers at once runs once: two views asking for the same URL share one
//! download and one decode, and each still gets its own cancellable,
//! reprioritizable [`TaskHandle`].
//!
//! # High-Level API
//!
//! ```ignore
//! use imagepipe::{Event, ImagePipeline, ImageRequest, PipelineConfig, Priority};
//! use imagepipe::process::Resize;
//!
//! let pipeline = ImagePipeline::new(PipelineConfig::default())?;
//!
//! let mut task = pipeline.load_image(
//!     ImageRequest::new("https://example.com/photo.jpg")
//!         .with_processor(Resize::new(320, 240))
//!         .with_priority(Priority::High),
//! );
//!
//! while let Some(event) = task.next_event().await {
//!     if let Event::Finished(result) = event {
//!         let response = result?;
//!         println!("{}x{}", response.image.width(), response.image.height());
//!     }
//! }
//! ```
//!
//! # Layout
//!
//! - [`pipeline`]: the [`ImagePipeline`] facade, handles and statistics
//! - [`request`]: what to load and how caches may be used
//! - [`loader`], [`decode`], [`process`]: pluggable collaborators
//! - [`cache`]: memory and disk caches
//! - [`telemetry`]: structured events for observers
//! - [`config`]: `~/.imagepipe/config.ini`

pub mod cache;
pub mod config;
pub mod decode;
mod engine;
pub mod error;
pub mod event;
pub mod keys;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod priority;
pub mod process;
pub mod request;
pub mod telemetry;

pub use engine::{LayerStats, QueueKind, QueueStats};
pub use error::{BuildError, DataLoadError, DecodeError, PipelineError, ProcessError};
pub use event::{CacheType, Event, FetchedData, ImageResponse, Progress, TaskState};
pub use pipeline::{
    DataTask, ImagePipeline, ImagePipelineBuilder, ImageTask, PipelineConfig, PipelineStats,
    TaskHandle, TaskId,
};
pub use priority::Priority;
pub use request::{ImageRequest, ImageSource, RequestOptions};

/// Version of the imagepipe library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
