//! Load-image layer: memory cache, processors, image handles.
//!
//! A load-image task first checks the memory cache. On a miss it subscribes
//! to the original image and runs the request's processors on what arrives.
//! At most one processing job per task runs at a time: a preview is
//! dropped while a job is running, and the final image replaces a preview
//! still waiting in the queue.

use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, warn};

use crate::cache::ImageCacheKey;
use crate::engine::command::Reply;
use crate::engine::coordinator::{Coordinator, Delivery, HandleEntry, ImageSubscriber};
use crate::engine::layers::FetchImageState;
use crate::engine::pool::Attach;
use crate::engine::task::{TaskEvent, TaskRef, TaskSlot};
use crate::engine::work::spawn_process;
use crate::error::PipelineError;
use crate::event::{CacheType, ImageResponse, TaskState};
use crate::keys::{Layer, LoadImageKey, OriginalImageKey};
use crate::pipeline::TaskId;
use crate::request::ImageRequest;
use crate::telemetry::{RequestKind, TelemetryEvent};

struct ProcessJob {
    image: Arc<RgbaImage>,
    is_final: bool,
    cache_type: Option<CacheType>,
}

pub(crate) struct LoadImageState {
    pub(crate) request: Arc<ImageRequest>,
    pending: Option<ProcessJob>,
    running: bool,
}

impl LoadImageState {
    pub(crate) fn new(request: Arc<ImageRequest>) -> Self {
        Self {
            request,
            pending: None,
            running: false,
        }
    }

    /// Stores a job to run next. Returns true if the task needs a new
    /// place in the processing queue.
    fn schedule(&mut self, job: ProcessJob) -> bool {
        let final_waiting = self.pending.as_ref().is_some_and(|p| p.is_final);
        if !job.is_final && (self.running || final_waiting) {
            return false;
        }
        let needs_slot = !self.running && self.pending.is_none();
        self.pending = Some(job);
        needs_slot
    }
}

impl Coordinator {
    pub(crate) fn submit_image(
        &mut self,
        id: TaskId,
        request: ImageRequest,
        reply: Reply<ImageResponse>,
    ) {
        self.counters.image_requests += 1;
        let Some((priority, reply)) = self.admit_request(id, &request, RequestKind::Image, reply)
        else {
            return;
        };

        let request = Arc::new(request);
        let joined = self.load_image.join(
            LoadImageKey::from(&*request),
            ImageSubscriber::Handle(id),
            priority,
            || LoadImageState::new(Arc::clone(&request)),
        );
        let task = TaskRef::LoadImage(joined.slot);

        reply.state.send_replace(TaskState::Started);
        let key = match joined.attach {
            Attach::Attached {
                key,
                catch_up,
                priority: changed,
            } => {
                self.deliveries.extend(
                    catch_up
                        .into_iter()
                        .map(|event| Delivery::Image(ImageSubscriber::Handle(id), event)),
                );
                self.on_joined(task, joined.created, changed, &request);
                Some(key)
            }
            Attach::Finished(event) => {
                self.deliveries
                    .push_back(Delivery::Image(ImageSubscriber::Handle(id), event));
                None
            }
        };

        debug!(
            task_id = %id,
            source = %request.source().id(),
            tag = request.tag().unwrap_or(""),
            coalesced = !joined.created,
            "Image request started"
        );
        self.image_handles.insert(
            id,
            HandleEntry {
                task,
                key,
                priority,
                reply,
                started_at: std::time::Instant::now(),
            },
        );

        if joined.created {
            self.start_load_image(joined.slot);
        }
    }

    fn start_load_image(&mut self, slot: TaskSlot) {
        let Some(task) = self.load_image.get(slot) else {
            return;
        };
        let request = Arc::clone(&task.ext.request);
        let priority = task.priority();

        if request.options().reads_memory_cache() {
            let cached = self
                .collaborators
                .image_cache
                .as_ref()
                .and_then(|cache| cache.get(&ImageCacheKey::from(&*request)));
            if let Some(image) = cached {
                self.counters.memory_cache_hits += 1;
                self.telemetry.emit(TelemetryEvent::CacheHit {
                    cache: CacheType::Memory,
                    layer: Layer::LoadImage,
                });
                let response = ImageResponse {
                    image,
                    is_preview: false,
                    cache_type: Some(CacheType::Memory),
                };
                self.emit_load_image(
                    slot,
                    TaskEvent::Value {
                        value: response,
                        is_completed: true,
                    },
                );
                return;
            }
        }

        let subscriber = ImageSubscriber::LoadImage(slot);
        let joined = self.fetch_image.join(
            OriginalImageKey::from(&*request),
            subscriber,
            priority,
            || FetchImageState::new(Arc::clone(&request)),
        );
        let lower = TaskRef::FetchImage(joined.slot);

        match joined.attach {
            Attach::Attached {
                key,
                catch_up,
                priority: changed,
            } => {
                self.set_dependency(TaskRef::LoadImage(slot), (lower, key));
                self.deliveries.extend(
                    catch_up
                        .into_iter()
                        .map(|event| Delivery::Image(subscriber, event)),
                );
                self.on_joined(lower, joined.created, changed, &request);
            }
            Attach::Finished(event) => self.deliveries.push_back(Delivery::Image(subscriber, event)),
        }

        if joined.created {
            self.start_fetch_image(joined.slot);
        }
    }

    /// Handles an event from the original image this task depends on.
    pub(crate) fn on_original_image_event(
        &mut self,
        slot: TaskSlot,
        event: TaskEvent<ImageResponse>,
    ) {
        let Some(task) = self.load_image.get_mut(slot) else {
            return;
        };
        let has_processors = !task.ext.request.processors().is_empty();

        match event {
            TaskEvent::Value {
                value,
                is_completed,
            } if has_processors => {
                let job = ProcessJob {
                    image: value.image,
                    is_final: is_completed,
                    cache_type: value.cache_type,
                };
                if task.ext.schedule(job) {
                    let priority = task.priority();
                    self.process_queue.enqueue(slot, priority);
                }
            }
            TaskEvent::Value {
                value,
                is_completed: true,
            } => {
                self.store_in_memory_cache(slot, &value);
                self.emit_load_image(
                    slot,
                    TaskEvent::Value {
                        value,
                        is_completed: true,
                    },
                );
            }
            event => self.emit_load_image(slot, event),
        }
    }

    pub(crate) fn start_process(&mut self, slot: TaskSlot) {
        let Some(task) = self.load_image.get_mut(slot) else {
            self.process_queue.finish(slot);
            return;
        };
        let Some(job) = task.ext.pending.take() else {
            self.process_queue.finish(slot);
            return;
        };
        task.ext.running = true;

        spawn_process(
            slot,
            job.is_final,
            job.cache_type,
            task.ext.request.processors().to_vec(),
            job.image,
            self.work_tx.clone(),
        );
    }

    pub(crate) fn on_processed(
        &mut self,
        slot: TaskSlot,
        is_final: bool,
        cache_type: Option<CacheType>,
        result: Result<RgbaImage, PipelineError>,
    ) {
        self.process_queue.finish(slot);
        let Some(task) = self.load_image.get_mut(slot) else {
            return;
        };
        task.ext.running = false;
        let requeue = task.ext.pending.is_some();
        let priority = task.priority();

        match result {
            Ok(image) => {
                let response = ImageResponse {
                    image: Arc::new(image),
                    is_preview: !is_final,
                    cache_type,
                };
                if is_final {
                    self.store_in_memory_cache(slot, &response);
                }
                self.emit_load_image(
                    slot,
                    TaskEvent::Value {
                        value: response,
                        is_completed: is_final,
                    },
                );
            }
            Err(e) if is_final => {
                warn!(error = %e, "Image processing failed");
                self.emit_load_image(slot, TaskEvent::Error(e));
            }
            Err(e) => {
                debug!(error = %e, "Preview processing failed");
            }
        }

        if requeue && self.load_image.contains(slot) {
            self.process_queue.enqueue(slot, priority);
        }
    }

    fn store_in_memory_cache(&self, slot: TaskSlot, response: &ImageResponse) {
        if response.cache_type == Some(CacheType::Memory) {
            return;
        }
        let Some(cache) = &self.collaborators.image_cache else {
            return;
        };
        let Some(task) = self.load_image.get(slot) else {
            return;
        };
        let request = &task.ext.request;
        if request.options().writes_memory_cache() {
            cache.insert(ImageCacheKey::from(&**request), Arc::clone(&response.image));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(is_final: bool) -> ProcessJob {
        ProcessJob {
            image: Arc::new(RgbaImage::new(1, 1)),
            is_final,
            cache_type: None,
        }
    }

    fn state() -> LoadImageState {
        LoadImageState::new(Arc::new(ImageRequest::new("https://example.com/a.png")))
    }

    #[test]
    fn test_idle_preview_takes_a_slot() {
        let mut state = state();
        assert!(state.schedule(job(false)));
        // A newer preview replaces the queued one without a new slot
        assert!(!state.schedule(job(false)));
        assert!(state.pending.is_some());
    }

    #[test]
    fn test_preview_dropped_while_running() {
        let mut state = state();
        state.running = true;
        assert!(!state.schedule(job(false)));
        assert!(state.pending.is_none());
    }

    #[test]
    fn test_final_deferred_while_running() {
        let mut state = state();
        state.running = true;
        assert!(!state.schedule(job(true)));
        assert!(state.pending.as_ref().is_some_and(|p| p.is_final));

        // Later previews never displace the final image
        assert!(!state.schedule(job(false)));
        assert!(state.pending.as_ref().is_some_and(|p| p.is_final));
    }

    #[test]
    fn test_final_replaces_queued_preview() {
        let mut state = state();
        assert!(state.schedule(job(false)));
        assert!(!state.schedule(job(true)));
        assert!(state.pending.as_ref().is_some_and(|p| p.is_final));
    }
}
