//! Data loading collaborators.
//!
//! The pipeline fetches encoded bytes through a [`DataLoader`] (for URL
//! sources) or a [`DataProducer`] (for custom sources). Loaders report their
//! result as a stream of [`LoadEvent`]s so the pipeline can emit progress and
//! feed progressive decoding while bytes arrive.
//!
//! ```text
//! DataRequest ──► DataLoader::load ──► Response ─► Chunk ─► Chunk ─► … ─► end
//!     │
//!     └── priority: watch::Receiver<Priority>   (updated while loading)
//! ```

mod http;
mod resumable;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::watch;

use crate::error::DataLoadError;
use crate::priority::Priority;

pub use http::{HttpDataLoader, HttpLoaderConfig, DEFAULT_USER_AGENT};
pub use resumable::{ResumableData, ResumableDataStore};

/// One step of a data load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    /// Response headers arrived
    Response {
        /// Full length of the resource, including any resumed prefix
        expected_length: Option<u64>,
        /// Entity validator (ETag or Last-Modified) used to resume later
        validator: Option<String>,
        /// True when the server continues the bytes in [`DataRequest::resume`]
        resumed: bool,
    },
    /// A chunk of body bytes
    Chunk(Bytes),
}

/// A fetch handed to a [`DataLoader`].
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub url: String,
    /// Current scheduling priority of the fetch; changes while loading
    pub priority: watch::Receiver<Priority>,
    /// Bytes saved from an earlier interrupted load of the same URL
    pub resume: Option<ResumableData>,
}

/// Fetches the bytes behind a URL.
///
/// The returned stream ends after the last chunk. A loader that cannot
/// continue from [`DataRequest::resume`] should answer with
/// `resumed: false` and send the whole body.
pub trait DataLoader: Send + Sync + 'static {
    fn load(&self, request: DataRequest) -> BoxStream<'static, Result<LoadEvent, DataLoadError>>;
}

/// Produces the bytes of a custom image source.
///
/// The id must be stable: requests with the same producer id are treated as
/// the same source and share work and cache entries.
pub trait DataProducer: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn produce(&self) -> BoxFuture<'static, Result<Bytes, DataLoadError>>;
}
