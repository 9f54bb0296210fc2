//! Image pipeline facade.
//!
//! [`ImagePipeline`] is the entry point: it owns the coordinator task and
//! hands out a [`TaskHandle`] per request. Every call returns immediately;
//! the work happens on the coordinator.
//!
//! # Example
//!
//! ```ignore
//! use imagepipe::{ImagePipeline, ImageRequest, PipelineConfig};
//! use imagepipe::process::Resize;
//!
//! let pipeline = ImagePipeline::new(PipelineConfig::default())?;
//!
//! // Both requests share one download and one decode
//! let small = pipeline.load_image(
//!     ImageRequest::new("https://example.com/a.png").with_processor(Resize::new(64, 64)),
//! );
//! let full = pipeline.load_image("https://example.com/a.png");
//!
//! let (small, full) = tokio::join!(small.response(), full.response());
//! ```

mod config;
mod handle;
mod stats;

pub use config::{
    DiskCacheConfig, PipelineConfig, RateLimiterConfig, DEFAULT_DATA_LOADING_CONCURRENCY,
    DEFAULT_DECODING_CONCURRENCY, DEFAULT_DISK_CACHE_SIZE, DEFAULT_MEMORY_CACHE_SIZE,
    DEFAULT_PROCESSING_CONCURRENCY, DEFAULT_RESUMABLE_CAPACITY, DEFAULT_RETAINED_OUTCOMES,
};
pub use handle::{DataTask, ImageTask, TaskHandle, TaskId};
pub use stats::PipelineStats;

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::cache::{DataCaching, DiskDataCache, ImageCaching, MemoryImageCache};
use crate::config::ConfigFile;
use crate::decode::{DefaultImageDecoder, ImageDecoding};
use crate::engine::{Collaborators, Command, CommandSender, Coordinator, Reply};
use crate::error::BuildError;
use crate::event::{Event, TaskState};
use crate::loader::{DataLoader, HttpDataLoader, ResumableDataStore};
use crate::request::ImageRequest;
use crate::telemetry::{NullTelemetrySink, TelemetrySink};

static SHARED: OnceLock<RwLock<Option<ImagePipeline>>> = OnceLock::new();

/// Loads, decodes, and processes images with coalescing of equal work.
///
/// Cloning is cheap; all clones drive the same coordinator. The
/// coordinator stops once every clone and every handle is dropped.
#[derive(Clone)]
pub struct ImagePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    commands: CommandSender,
    config: PipelineConfig,
}

impl ImagePipeline {
    /// Creates a pipeline with the default collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self, BuildError> {
        ImagePipelineBuilder::new(config).build()
    }

    pub fn builder(config: PipelineConfig) -> ImagePipelineBuilder {
        ImagePipelineBuilder::new(config)
    }

    /// Returns the process-wide pipeline, creating one with the default
    /// configuration on first use.
    ///
    /// The shared pipeline lives on the runtime that first created it.
    pub fn shared() -> Result<Self, BuildError> {
        let lock = SHARED.get_or_init(|| RwLock::new(None));
        if let Some(pipeline) = lock.read().as_ref() {
            return Ok(pipeline.clone());
        }

        let mut guard = lock.write();
        if let Some(pipeline) = guard.as_ref() {
            return Ok(pipeline.clone());
        }
        let pipeline = Self::new(PipelineConfig::default())?;
        *guard = Some(pipeline.clone());
        Ok(pipeline)
    }

    /// Replaces the process-wide pipeline.
    pub fn set_shared(pipeline: ImagePipeline) {
        let lock = SHARED.get_or_init(|| RwLock::new(None));
        *lock.write() = Some(pipeline);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Loads a decoded image with the request's processors applied.
    pub fn load_image(&self, request: impl Into<ImageRequest>) -> ImageTask {
        let id = TaskId::next();
        let (reply, events, state) = reply_channels();
        self.submit(Command::LoadImage {
            id,
            request: request.into(),
            reply,
        });
        TaskHandle::new(id, self.inner.commands.clone(), events, state)
    }

    /// Loads the encoded bytes of the request's source.
    ///
    /// Processors and thumbnail options are ignored. The bytes are shared
    /// with concurrent image loads of the same source.
    pub fn load_data(&self, request: impl Into<ImageRequest>) -> DataTask {
        let id = TaskId::next();
        let (reply, events, state) = reply_channels();
        self.submit(Command::LoadData {
            id,
            request: request.into(),
            reply,
        });
        TaskHandle::new(id, self.inner.commands.clone(), events, state)
    }

    /// Fails every running request with
    /// [`PipelineInvalidated`](crate::PipelineError::PipelineInvalidated)
    /// and rejects every later one. Irreversible.
    pub fn invalidate(&self) {
        let _ = self.inner.commands.send(Command::Invalidate);
    }

    /// Returns a statistics snapshot, or `None` if the coordinator stopped.
    pub async fn stats(&self) -> Option<PipelineStats> {
        let (reply, rx) = oneshot::channel();
        self.inner.commands.send(Command::Stats { reply }).ok()?;
        rx.await.ok()
    }

    fn submit(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.inner.commands.send(command) {
            command.reject();
        }
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("config", &self.inner.config)
            .finish()
    }
}

type ReplyChannels<V> = (
    Reply<V>,
    mpsc::UnboundedReceiver<Event<V>>,
    watch::Receiver<TaskState>,
);

fn reply_channels<V>() -> ReplyChannels<V> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(TaskState::Created);
    (
        Reply {
            events: events_tx,
            state: state_tx,
        },
        events_rx,
        state_rx,
    )
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`ImagePipeline`] with custom collaborators.
///
/// Anything not supplied falls back to the default for the configuration:
/// [`HttpDataLoader`], [`DefaultImageDecoder`], a [`MemoryImageCache`] if
/// `memory_cache_size` is set and a [`DiskDataCache`] if `disk_cache` is
/// set.
pub struct ImagePipelineBuilder {
    config: PipelineConfig,
    loader: Option<Arc<dyn DataLoader>>,
    decoder: Option<Arc<dyn ImageDecoding>>,
    image_cache: Option<Arc<dyn ImageCaching>>,
    data_cache: Option<Arc<dyn DataCaching>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ImagePipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            loader: None,
            decoder: None,
            image_cache: None,
            data_cache: None,
            telemetry: Arc::new(NullTelemetrySink),
        }
    }

    /// Starts from the settings in a configuration file.
    pub fn from_config_file(file: &ConfigFile) -> Self {
        Self::new(PipelineConfig::from(file))
    }

    pub fn with_loader(mut self, loader: impl DataLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn with_decoder(mut self, decoder: impl ImageDecoding) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Uses `cache` as the memory cache regardless of `memory_cache_size`.
    pub fn with_image_cache(mut self, cache: Arc<dyn ImageCaching>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    /// Uses `cache` as the data cache regardless of `disk_cache`.
    pub fn with_data_cache(mut self, cache: Arc<dyn DataCaching>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Spawns the coordinator on the current tokio runtime.
    pub fn build(self) -> Result<ImagePipeline, BuildError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
        let config = self.config;

        let loader: Arc<dyn DataLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(HttpDataLoader::with_config(&config.http).map_err(BuildError::HttpClient)?),
        };
        let decoder: Arc<dyn ImageDecoding> = match self.decoder {
            Some(decoder) => decoder,
            None => Arc::new(DefaultImageDecoder),
        };

        let image_cache = self.image_cache.or_else(|| {
            config
                .memory_cache_size
                .map(|size| Arc::new(MemoryImageCache::new(size)) as Arc<dyn ImageCaching>)
        });
        let data_cache = match (self.data_cache, &config.disk_cache) {
            (Some(cache), _) => Some(cache),
            (None, Some(disk)) => {
                let cache = DiskDataCache::new(disk.directory.clone(), disk.max_size_bytes)
                    .map_err(BuildError::DiskCache)?;
                Some(Arc::new(cache) as Arc<dyn DataCaching>)
            }
            (None, None) => None,
        };
        let resumable = config
            .resumable_data
            .then(|| Arc::new(ResumableDataStore::new(DEFAULT_RESUMABLE_CAPACITY)));

        info!(
            memory_cache = image_cache.is_some(),
            disk_cache = data_cache.is_some(),
            coalescing = config.coalescing,
            "Building image pipeline"
        );

        let collaborators = Collaborators {
            loader,
            decoder,
            image_cache,
            data_cache,
            resumable,
            telemetry: self.telemetry,
        };
        let (commands, command_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(config.clone(), collaborators);
        runtime.spawn(coordinator.run(command_rx));

        Ok(ImagePipeline {
            inner: Arc::new(Inner { commands, config }),
        })
    }
}
