//! Caches for decoded images and encoded data.
//!
//! Two independent tiers plug into the pipeline through traits:
//!
//! - [`ImageCaching`]: decoded, processed images keyed by [`ImageCacheKey`].
//!   Read synchronously before any work is scheduled.
//! - [`DataCaching`]: encoded bytes keyed by source. Read before the network
//!   fetch, written after a successful fetch.
//!
//! [`MemoryImageCache`] and [`DiskDataCache`] are the default implementations.

mod disk;
mod memory;
mod path;
mod stats;
mod r#trait;
mod types;

pub use disk::DiskDataCache;
pub use memory::MemoryImageCache;
pub use path::cache_file_name;
pub use r#trait::{DataCaching, ImageCaching};
pub use stats::CacheStats;
pub use types::ImageCacheKey;
