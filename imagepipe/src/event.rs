//! Events and values delivered to callers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbaImage;

use crate::error::PipelineError;

/// Download progress in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes received so far
    pub completed: u64,
    /// Total bytes, if the source announced a length
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(completed: u64, total: Option<u64>) -> Self {
        Self { completed, total }
    }

    /// Fraction completed in `0.0..=1.0`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "{}/{} bytes", self.completed, total),
            None => write!(f, "{} bytes", self.completed),
        }
    }
}

/// One event on a caller's task handle.
///
/// A handle receives any number of progress and preview events followed by
/// exactly one terminal event ([`Event::Cancelled`] or [`Event::Finished`]).
#[derive(Debug, Clone)]
pub enum Event<V> {
    /// Bytes arrived
    Progress(Progress),
    /// An intermediate result from progressive decoding
    Preview(V),
    /// The caller cancelled the task
    Cancelled,
    /// The task finished
    Finished(Result<V, PipelineError>),
}

impl<V> Event<V> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Cancelled | Event::Finished(_))
    }
}

/// Where a result was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// Decoded-image memory cache
    Memory,
    /// Encoded-data disk cache
    Disk,
}

/// A decoded, processed image.
#[derive(Clone)]
pub struct ImageResponse {
    /// The pixels, shared between every subscriber
    pub image: Arc<RgbaImage>,
    /// True for previews produced from partial data
    pub is_preview: bool,
    /// Set when the result came from a cache
    pub cache_type: Option<CacheType>,
}

impl ImageResponse {
    pub fn new(image: Arc<RgbaImage>) -> Self {
        Self {
            image,
            is_preview: false,
            cache_type: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for ImageResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResponse")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("is_preview", &self.is_preview)
            .field("cache_type", &self.cache_type)
            .finish()
    }
}

/// Encoded bytes of a source.
#[derive(Clone)]
pub struct FetchedData {
    pub data: Bytes,
    /// Length announced by the source, if any
    pub expected_length: Option<u64>,
    /// Set when the bytes came from a cache
    pub cache_type: Option<CacheType>,
}

impl FetchedData {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            expected_length: None,
            cache_type: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for FetchedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedData")
            .field("len", &self.data.len())
            .field("expected_length", &self.expected_length)
            .field("cache_type", &self.cache_type)
            .finish()
    }
}

/// Lifecycle state of a caller's task handle.
///
/// Transitions are `Created → Started → {Cancelled | Completed}` and never
/// go backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Started,
    Cancelled,
    Completed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Started => "started",
            TaskState::Cancelled => "cancelled",
            TaskState::Completed => "completed",
        };
        f.write_str(s)
    }
}
