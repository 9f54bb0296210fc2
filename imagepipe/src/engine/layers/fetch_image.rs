//! Fetch-original-image layer: decoding.

use std::sync::Arc;

use bytes::Bytes;
use image::RgbaImage;
use tracing::{debug, trace, warn};

use crate::engine::coordinator::{Coordinator, DataSubscriber};
use crate::engine::task::{TaskEvent, TaskRef, TaskSlot};
use crate::engine::work::{spawn_decode, DecodeKind};
use crate::error::{DecodeError, PipelineError};
use crate::event::{CacheType, FetchedData, ImageResponse};
use crate::request::ImageRequest;

struct DecodeJob {
    data: Bytes,
    kind: DecodeKind,
}

pub(crate) struct FetchImageState {
    pub(crate) request: Arc<ImageRequest>,
    pending: Option<DecodeJob>,
    running: bool,
    /// Where the final data came from
    cache_type: Option<CacheType>,
}

impl FetchImageState {
    pub(crate) fn new(request: Arc<ImageRequest>) -> Self {
        Self {
            request,
            pending: None,
            running: false,
            cache_type: None,
        }
    }

    /// Stores a job to run next. Returns true if the task needs a new
    /// place in the decoding queue.
    fn schedule(&mut self, job: DecodeJob) -> bool {
        let final_waiting = self
            .pending
            .as_ref()
            .is_some_and(|p| p.kind == DecodeKind::Final);
        if job.kind == DecodeKind::Preview && (self.running || final_waiting) {
            return false;
        }
        let needs_slot = !self.running && self.pending.is_none();
        self.pending = Some(job);
        needs_slot
    }
}

impl Coordinator {
    pub(crate) fn start_fetch_image(&mut self, slot: TaskSlot) {
        let Some(task) = self.fetch_image.get(slot) else {
            return;
        };
        let request = Arc::clone(&task.ext.request);
        let priority = task.priority();
        self.subscribe_to_data(
            TaskRef::FetchImage(slot),
            DataSubscriber::FetchImage(slot),
            &request,
            priority,
        );
    }

    /// Handles an event from the data this task decodes.
    pub(crate) fn on_original_data_event(&mut self, slot: TaskSlot, event: TaskEvent<FetchedData>) {
        let progressive = self.config.progressive_decoding;
        let Some(task) = self.fetch_image.get_mut(slot) else {
            return;
        };

        match event {
            TaskEvent::Value {
                value,
                is_completed,
            } => {
                if !is_completed && !progressive {
                    return;
                }
                let kind = if is_completed {
                    task.ext.cache_type = value.cache_type;
                    DecodeKind::Final
                } else {
                    DecodeKind::Preview
                };
                let job = DecodeJob {
                    data: value.data,
                    kind,
                };
                if task.ext.schedule(job) {
                    let priority = task.priority();
                    self.decode_queue.enqueue(slot, priority);
                }
            }
            TaskEvent::Progress(progress) => {
                self.emit_fetch_image(slot, TaskEvent::Progress(progress))
            }
            TaskEvent::Error(e) => self.emit_fetch_image(slot, TaskEvent::Error(e)),
            TaskEvent::Cancelled => self.emit_fetch_image(slot, TaskEvent::Cancelled),
        }
    }

    pub(crate) fn start_decode(&mut self, slot: TaskSlot) {
        let Some(task) = self.fetch_image.get_mut(slot) else {
            self.decode_queue.finish(slot);
            return;
        };
        let Some(job) = task.ext.pending.take() else {
            self.decode_queue.finish(slot);
            return;
        };
        task.ext.running = true;

        trace!(slot, kind = ?job.kind, bytes = job.data.len(), "Decoding");
        spawn_decode(
            slot,
            job.kind,
            Arc::clone(&self.collaborators.decoder),
            job.data,
            task.ext.request.thumbnail(),
            self.work_tx.clone(),
        );
    }

    pub(crate) fn on_decoded(
        &mut self,
        slot: TaskSlot,
        kind: DecodeKind,
        data_len: usize,
        result: Result<Option<RgbaImage>, DecodeError>,
    ) {
        self.decode_queue.finish(slot);
        let Some(task) = self.fetch_image.get_mut(slot) else {
            return;
        };
        task.ext.running = false;
        let requeue = task.ext.pending.is_some();
        let priority = task.priority();
        let cache_type = task.ext.cache_type;

        match (kind, result) {
            (DecodeKind::Final, Ok(Some(image))) => {
                let response = ImageResponse {
                    image: Arc::new(image),
                    is_preview: false,
                    cache_type,
                };
                self.emit_fetch_image(
                    slot,
                    TaskEvent::Value {
                        value: response,
                        is_completed: true,
                    },
                );
            }
            (DecodeKind::Final, Ok(None)) => {
                let error = DecodeError::Unsupported { len: data_len };
                warn!(error = %error, "Decoder returned no image for complete data");
                self.emit_fetch_image(slot, TaskEvent::Error(PipelineError::DecodingFailed(error)));
            }
            (DecodeKind::Final, Err(e)) => {
                warn!(error = %e, bytes = data_len, "Decoding failed");
                self.emit_fetch_image(slot, TaskEvent::Error(PipelineError::DecodingFailed(e)));
            }
            (DecodeKind::Preview, Ok(Some(image))) => {
                let response = ImageResponse {
                    image: Arc::new(image),
                    is_preview: true,
                    cache_type: None,
                };
                self.emit_fetch_image(
                    slot,
                    TaskEvent::Value {
                        value: response,
                        is_completed: false,
                    },
                );
            }
            (DecodeKind::Preview, Ok(None)) => {
                trace!(slot, bytes = data_len, "Not enough data for a preview");
            }
            (DecodeKind::Preview, Err(e)) => {
                debug!(error = %e, "Preview decoding failed");
            }
        }

        if requeue && self.fetch_image.contains(slot) {
            self.decode_queue.enqueue(slot, priority);
        }
    }
}
