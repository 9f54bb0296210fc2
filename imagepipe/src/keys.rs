//! Task identity keys.
//!
//! Each layer of the pipeline coalesces on its own key type. A key holds
//! exactly the request fields that affect that layer's result:
//!
//! ```text
//! LoadImageKey       source + processors + thumbnail + cache reads
//!   └─ OriginalImageKey  source + thumbnail + disk reads
//!        └─ DataKey          source + disk reads
//! LoadDataKey        source + disk reads
//! ```
//!
//! Requests that differ only in processors therefore share one original
//! image task and one data task. Priority and tag never appear in a key.

use std::fmt;

use crate::cache::ImageCacheKey;
use crate::request::{ImageRequest, SourceId};

/// Key of a top-level image load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadImageKey {
    pub source: SourceId,
    pub processors: Vec<String>,
    pub thumbnail: Option<u32>,
    pub reads_memory_cache: bool,
    pub reads_disk_cache: bool,
}

impl From<&ImageRequest> for LoadImageKey {
    fn from(request: &ImageRequest) -> Self {
        let options = request.options();
        Self {
            source: request.source().id(),
            processors: request.processor_ids(),
            thumbnail: request.thumbnail(),
            reads_memory_cache: options.reads_memory_cache(),
            reads_disk_cache: options.reads_disk_cache(),
        }
    }
}

/// Key of a decoded, unprocessed image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginalImageKey {
    pub source: SourceId,
    pub thumbnail: Option<u32>,
    pub reads_disk_cache: bool,
}

impl From<&ImageRequest> for OriginalImageKey {
    fn from(request: &ImageRequest) -> Self {
        Self {
            source: request.source().id(),
            thumbnail: request.thumbnail(),
            reads_disk_cache: request.options().reads_disk_cache(),
        }
    }
}

/// Key of the encoded bytes of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub source: SourceId,
    pub reads_disk_cache: bool,
}

impl From<&ImageRequest> for DataKey {
    fn from(request: &ImageRequest) -> Self {
        Self {
            source: request.source().id(),
            reads_disk_cache: request.options().reads_disk_cache(),
        }
    }
}

/// Key of a top-level data load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadDataKey {
    pub source: SourceId,
    pub reads_disk_cache: bool,
}

impl From<&ImageRequest> for LoadDataKey {
    fn from(request: &ImageRequest) -> Self {
        Self {
            source: request.source().id(),
            reads_disk_cache: request.options().reads_disk_cache(),
        }
    }
}

impl From<&ImageRequest> for ImageCacheKey {
    fn from(request: &ImageRequest) -> Self {
        ImageCacheKey::new(
            request.source().id(),
            request.processor_ids(),
            request.thumbnail(),
        )
    }
}

/// The four task layers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Decoded and processed image
    LoadImage,
    /// Decoded image before processing
    FetchOriginalImage,
    /// Encoded bytes
    FetchOriginalData,
    /// Encoded bytes delivered to a caller
    LoadData,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::LoadImage => "load_image",
            Layer::FetchOriginalImage => "fetch_original_image",
            Layer::FetchOriginalData => "fetch_original_data",
            Layer::LoadData => "load_data",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
