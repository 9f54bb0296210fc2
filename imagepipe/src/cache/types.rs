//! Cache key types.

use std::fmt;

use crate::request::SourceId;

/// Key of a decoded, processed image in the memory cache.
///
/// Contains every request field that changes the pixels and nothing else,
/// so cache policy flags never split entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageCacheKey {
    pub source: SourceId,
    pub processors: Vec<String>,
    pub thumbnail: Option<u32>,
}

impl ImageCacheKey {
    pub fn new(source: SourceId, processors: Vec<String>, thumbnail: Option<u32>) -> Self {
        Self {
            source,
            processors,
            thumbnail,
        }
    }
}

impl fmt::Display for ImageCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if let Some(max) = self.thumbnail {
            write!(f, "@{}", max)?;
        }
        for p in &self.processors {
            write!(f, "|{}", p)?;
        }
        Ok(())
    }
}
