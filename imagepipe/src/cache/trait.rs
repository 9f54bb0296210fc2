//! Cache traits for dependency injection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbaImage;

use super::types::ImageCacheKey;
use crate::error::CacheError;

/// Synchronous cache of decoded images.
///
/// Lookups happen on the coordinator before any work is scheduled, so
/// implementations must be fast and must not block.
pub trait ImageCaching: Send + Sync + 'static {
    fn get(&self, key: &ImageCacheKey) -> Option<Arc<RgbaImage>>;

    fn insert(&self, key: ImageCacheKey, image: Arc<RgbaImage>);

    fn remove(&self, key: &ImageCacheKey);

    fn clear(&self);
}

/// Asynchronous cache of encoded bytes.
///
/// Errors are not fatal to a request: a failed read is a miss and a failed
/// write is logged.
pub trait DataCaching: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Option<Bytes>> + Send + 'a>>;

    fn store<'a>(
        &'a self,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), CacheError>> + Send + 'a>>;

    fn remove<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}
