//! Image request description.
//!
//! An [`ImageRequest`] names where the bytes come from, which processors run
//! on the decoded image, and how caches may be used. Some fields only affect
//! how the result is delivered (priority, tag); those never take part in task
//! identity, so two requests differing only in them share one task.
//!
//! # Example
//!
//! ```ignore
//! use imagepipe::{ImageRequest, Priority, RequestOptions};
//! use imagepipe::process::Resize;
//!
//! let request = ImageRequest::new("https://example.com/a.png")
//!     .with_processor(Resize::new(256, 256))
//!     .with_priority(Priority::High)
//!     .with_options(RequestOptions::default().disable_disk_cache_writes());
//! ```

use std::fmt;
use std::sync::Arc;

use crate::loader::DataProducer;
use crate::priority::Priority;
use crate::process::ImageProcessor;

/// Where the encoded bytes of an image come from.
#[derive(Clone)]
pub enum ImageSource {
    /// Fetched through the pipeline's data loader
    Url(String),
    /// Produced by a caller-supplied collaborator
    Producer(Arc<dyn DataProducer>),
}

impl ImageSource {
    /// Stable identity of this source, used in task keys and cache keys.
    pub fn id(&self) -> SourceId {
        match self {
            ImageSource::Url(url) => SourceId::Url(url.clone()),
            ImageSource::Producer(p) => SourceId::Producer(p.id().to_string()),
        }
    }

    /// Returns the URL when the source is fetched over the network.
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageSource::Url(url) => Some(url),
            ImageSource::Producer(_) => None,
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ImageSource::Producer(p) => f.debug_tuple("Producer").field(&p.id()).finish(),
        }
    }
}

/// Hashable identity of an [`ImageSource`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Network source identified by URL
    Url(String),
    /// Custom producer identified by its declared id
    Producer(String),
}

impl SourceId {
    /// Returns a string form suitable for cache file naming.
    pub fn cache_key(&self) -> String {
        match self {
            SourceId::Url(url) => url.clone(),
            SourceId::Producer(id) => format!("producer:{}", id),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Url(url) => f.write_str(url),
            SourceId::Producer(id) => write!(f, "producer:{}", id),
        }
    }
}

/// Cache policy flags for a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    /// Skip every cache read and fetch fresh data
    pub reload_ignoring_cache: bool,
    /// Do not read the decoded-image memory cache
    pub disable_memory_cache_reads: bool,
    /// Do not store the result in the memory cache
    pub disable_memory_cache_writes: bool,
    /// Do not read the encoded-data disk cache
    pub disable_disk_cache_reads: bool,
    /// Do not store fetched data in the disk cache
    pub disable_disk_cache_writes: bool,
}

impl RequestOptions {
    pub fn reload_ignoring_cache(mut self) -> Self {
        self.reload_ignoring_cache = true;
        self
    }

    pub fn disable_memory_cache_reads(mut self) -> Self {
        self.disable_memory_cache_reads = true;
        self
    }

    pub fn disable_memory_cache_writes(mut self) -> Self {
        self.disable_memory_cache_writes = true;
        self
    }

    pub fn disable_disk_cache_reads(mut self) -> Self {
        self.disable_disk_cache_reads = true;
        self
    }

    pub fn disable_disk_cache_writes(mut self) -> Self {
        self.disable_disk_cache_writes = true;
        self
    }

    /// Whether the memory cache may be consulted.
    pub fn reads_memory_cache(&self) -> bool {
        !self.reload_ignoring_cache && !self.disable_memory_cache_reads
    }

    /// Whether the disk cache may be consulted.
    pub fn reads_disk_cache(&self) -> bool {
        !self.reload_ignoring_cache && !self.disable_disk_cache_reads
    }

    pub fn writes_memory_cache(&self) -> bool {
        !self.disable_memory_cache_writes
    }

    pub fn writes_disk_cache(&self) -> bool {
        !self.disable_disk_cache_writes
    }
}

/// A request for a decoded, processed image.
#[derive(Clone)]
pub struct ImageRequest {
    source: ImageSource,
    processors: Vec<Arc<dyn ImageProcessor>>,
    thumbnail: Option<u32>,
    priority: Option<Priority>,
    options: RequestOptions,
    tag: Option<String>,
}

impl ImageRequest {
    /// Creates a request for the image at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_source(ImageSource::Url(url.into()))
    }

    /// Creates a request whose bytes come from a custom producer.
    pub fn with_producer(producer: impl DataProducer) -> Self {
        Self::from_source(ImageSource::Producer(Arc::new(producer)))
    }

    pub fn from_source(source: ImageSource) -> Self {
        Self {
            source,
            processors: Vec::new(),
            thumbnail: None,
            priority: None,
            options: RequestOptions::default(),
            tag: None,
        }
    }

    /// Appends a processor. Processors run in insertion order.
    pub fn with_processor(mut self, processor: impl ImageProcessor) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Replaces the processor list.
    pub fn with_processors(mut self, processors: Vec<Arc<dyn ImageProcessor>>) -> Self {
        self.processors = processors;
        self
    }

    /// Decodes a downscaled image whose longest side is at most `max_pixels`.
    ///
    /// Unlike a resize processor this is applied right after decoding, so
    /// the full-size image is never cached.
    pub fn with_thumbnail(mut self, max_pixels: u32) -> Self {
        self.thumbnail = Some(max_pixels.max(1));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Attaches a caller label that shows up in logs.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn processors(&self) -> &[Arc<dyn ImageProcessor>] {
        &self.processors
    }

    pub fn thumbnail(&self) -> Option<u32> {
        self.thumbnail
    }

    /// Requested priority, if the caller set one.
    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Identifiers of the processors, in order.
    pub fn processor_ids(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|p| p.identifier().to_string())
            .collect()
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("source", &self.source)
            .field("processors", &self.processor_ids())
            .field("thumbnail", &self.thumbnail)
            .field("priority", &self.priority)
            .field("options", &self.options)
            .field("tag", &self.tag)
            .finish()
    }
}

impl From<&str> for ImageRequest {
    fn from(url: &str) -> Self {
        ImageRequest::new(url)
    }
}

impl From<String> for ImageRequest {
    fn from(url: String) -> Self {
        ImageRequest::new(url)
    }
}
