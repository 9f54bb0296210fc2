//! Point-in-time pipeline statistics.

use crate::engine::{LayerStats, QueueStats};

/// Snapshot returned by [`ImagePipeline::stats`](super::ImagePipeline::stats).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Image requests submitted
    pub image_requests: u64,
    /// Data requests submitted
    pub data_requests: u64,
    /// Requests that finished with a value
    pub succeeded: u64,
    /// Requests that finished with an error
    pub failed: u64,
    /// Requests cancelled by their caller
    pub cancelled: u64,
    /// Requests currently running
    pub active: usize,

    pub load_image: LayerStats,
    pub fetch_original_image: LayerStats,
    pub fetch_original_data: LayerStats,
    pub load_data: LayerStats,

    pub data_loading_queue: QueueStats,
    pub decoding_queue: QueueStats,
    pub processing_queue: QueueStats,

    /// Fetches that had to wait for a rate limiter token
    pub rate_limited: u64,
    /// Fetches currently waiting for a token
    pub rate_limiter_pending: usize,

    pub memory_cache_hits: u64,
    pub disk_cache_hits: u64,

    pub invalidated: bool,
}

impl PipelineStats {
    /// Fraction of data-layer subscriptions that joined an existing task.
    pub fn coalescing_ratio(&self) -> f64 {
        let layer = &self.fetch_original_data;
        let total = layer.created + layer.coalesced;
        if total == 0 {
            0.0
        } else {
            layer.coalesced as f64 / total as f64
        }
    }

    /// Requests that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }
}
