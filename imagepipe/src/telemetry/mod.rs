//! Telemetry for pipeline observability.
//!
//! The coordinator emits structured events through a [`TelemetrySink`] and
//! never decides how they are presented. Logging, metrics and UI are all
//! just sinks.
//!
//! # Example
//!
//! ```ignore
//! use imagepipe::telemetry::{TelemetryEvent, TelemetrySink};
//!
//! struct CountingSink(std::sync::atomic::AtomicUsize);
//!
//! impl TelemetrySink for CountingSink {
//!     fn emit(&self, _event: TelemetryEvent) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::QueueKind;
use crate::event::CacheType;
use crate::keys::Layer;
use crate::pipeline::TaskId;
use crate::priority::Priority;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Which public entry point created a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Image,
    Data,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Image => f.write_str("image"),
            RequestKind::Data => f.write_str("data"),
        }
    }
}

/// How an internal task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Succeeded => f.write_str("succeeded"),
            TaskOutcome::Failed => f.write_str("failed"),
            TaskOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Events emitted by the pipeline coordinator.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    // -------------------------------------------------------------------------
    // Request Lifecycle Events
    // -------------------------------------------------------------------------
    /// A caller submitted a request.
    RequestSubmitted {
        task_id: TaskId,
        kind: RequestKind,
        source: String,
        priority: Priority,
    },

    /// A request delivered its final result.
    RequestCompleted {
        task_id: TaskId,
        success: bool,
        duration: Duration,
    },

    /// A caller cancelled a request.
    RequestCancelled { task_id: TaskId, duration: Duration },

    /// The pipeline was invalidated.
    PipelineInvalidated { failed_requests: usize },

    // -------------------------------------------------------------------------
    // Task Events
    // -------------------------------------------------------------------------
    /// A new internal task was created.
    TaskCreated { layer: Layer, source: String },

    /// A subscriber joined an existing task instead of creating one.
    TaskCoalesced { layer: Layer, subscribers: usize },

    /// An internal task reached a terminal state.
    TaskFinished { layer: Layer, outcome: TaskOutcome },

    // -------------------------------------------------------------------------
    // Scheduling Events
    // -------------------------------------------------------------------------
    /// A fetch is waiting for a rate limiter token.
    FetchRateLimited { pending: usize },

    /// An operation started on a work queue.
    OperationStarted {
        queue: QueueKind,
        priority: Priority,
        queue_depth: usize,
    },

    // -------------------------------------------------------------------------
    // Cache Events
    // -------------------------------------------------------------------------
    /// A result was served from a cache.
    CacheHit { cache: CacheType, layer: Layer },

    /// A cache write failed. The request itself is unaffected.
    CacheWriteFailed { cache: CacheType, error: String },
}

impl TelemetryEvent {
    /// Returns the request id associated with this event, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::RequestSubmitted { task_id, .. }
            | Self::RequestCompleted { task_id, .. }
            | Self::RequestCancelled { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RequestSubmitted { .. } => "request_submitted",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestCancelled { .. } => "request_cancelled",
            Self::PipelineInvalidated { .. } => "pipeline_invalidated",
            Self::TaskCreated { .. } => "task_created",
            Self::TaskCoalesced { .. } => "task_coalesced",
            Self::TaskFinished { .. } => "task_finished",
            Self::FetchRateLimited { .. } => "fetch_rate_limited",
            Self::OperationStarted { .. } => "operation_started",
            Self::CacheHit { .. } => "cache_hit",
            Self::CacheWriteFailed { .. } => "cache_write_failed",
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Sink for telemetry events.
///
/// Events are emitted from the coordinator task, so `emit` must be fast and
/// must never block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink for when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::RequestSubmitted {
                task_id,
                kind,
                source,
                priority,
            } => {
                tracing::debug!(
                    task_id = %task_id,
                    kind = %kind,
                    source = %source,
                    priority = %priority,
                    "Request submitted"
                );
            }
            TelemetryEvent::RequestCompleted {
                task_id,
                success,
                duration,
            } => {
                tracing::debug!(
                    task_id = %task_id,
                    success = success,
                    duration_ms = duration.as_millis(),
                    "Request completed"
                );
            }
            TelemetryEvent::RequestCancelled { task_id, duration } => {
                tracing::debug!(
                    task_id = %task_id,
                    duration_ms = duration.as_millis(),
                    "Request cancelled"
                );
            }
            TelemetryEvent::PipelineInvalidated { failed_requests } => {
                tracing::info!(failed_requests = failed_requests, "Pipeline invalidated");
            }
            TelemetryEvent::TaskCreated { layer, source } => {
                tracing::trace!(layer = %layer, source = %source, "Task created");
            }
            TelemetryEvent::TaskCoalesced { layer, subscribers } => {
                tracing::trace!(layer = %layer, subscribers = subscribers, "Task coalesced");
            }
            TelemetryEvent::TaskFinished { layer, outcome } => {
                tracing::trace!(layer = %layer, outcome = %outcome, "Task finished");
            }
            TelemetryEvent::FetchRateLimited { pending } => {
                tracing::debug!(pending = pending, "Fetch rate limited");
            }
            TelemetryEvent::OperationStarted {
                queue,
                priority,
                queue_depth,
            } => {
                tracing::trace!(
                    queue = %queue,
                    priority = %priority,
                    queue_depth = queue_depth,
                    "Operation started"
                );
            }
            TelemetryEvent::CacheHit { cache, layer } => {
                tracing::trace!(cache = ?cache, layer = %layer, "Cache hit");
            }
            TelemetryEvent::CacheWriteFailed { cache, error } => {
                tracing::warn!(cache = ?cache, error = %error, "Cache write failed");
            }
        }
    }
}

/// Sink that forwards events to multiple sinks.
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl fmt::Debug for MultiplexTelemetrySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexTelemetrySink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}
