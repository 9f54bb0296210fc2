//! Fetch-original-data layer: disk cache, rate limiting, loading.
//!
//! ```text
//!   start ──► disk cache lookup ──hit──► final value
//!                 │ miss / reads disabled
//!                 ▼
//!            rate limiter (URL sources) ──► data loading queue ──► FetchJob
//!                                                             └──► ProduceJob
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::coordinator::{Coordinator, DataSubscriber, Delivery};
use crate::engine::pool::Attach;
use crate::engine::task::{TaskEvent, TaskRef, TaskSlot};
use crate::engine::work::{spawn_cache_lookup, CacheWrite, FetchJob, ProduceJob};
use crate::error::{DataLoadError, PipelineError};
use crate::event::{CacheType, FetchedData, Progress};
use crate::keys::{DataKey, Layer};
use crate::priority::Priority;
use crate::request::{ImageRequest, ImageSource};
use crate::telemetry::TelemetryEvent;

pub(crate) struct FetchDataState {
    pub(crate) request: Arc<ImageRequest>,
    /// Priority channel of the running loader
    pub(crate) priority_tx: Option<watch::Sender<Priority>>,
}

impl FetchDataState {
    pub(crate) fn new(request: Arc<ImageRequest>) -> Self {
        Self {
            request,
            priority_tx: None,
        }
    }
}

impl Coordinator {
    /// Subscribes an upper task to the data of its request, creating and
    /// starting the data task if needed.
    pub(crate) fn subscribe_to_data(
        &mut self,
        upper: TaskRef,
        subscriber: DataSubscriber,
        request: &Arc<ImageRequest>,
        priority: Priority,
    ) {
        let joined = self.fetch_data.join(
            DataKey::from(&**request),
            subscriber,
            priority,
            || FetchDataState::new(Arc::clone(request)),
        );
        let lower = TaskRef::FetchData(joined.slot);

        match joined.attach {
            Attach::Attached {
                key,
                catch_up,
                priority: changed,
            } => {
                self.set_dependency(upper, (lower, key));
                self.deliveries.extend(
                    catch_up
                        .into_iter()
                        .map(|event| Delivery::Data(subscriber, event)),
                );
                self.on_joined(lower, joined.created, changed, request);
            }
            Attach::Finished(event) => self.deliveries.push_back(Delivery::Data(subscriber, event)),
        }

        if joined.created {
            self.start_fetch_data(joined.slot);
        }
    }

    fn start_fetch_data(&mut self, slot: TaskSlot) {
        let Some(task) = self.fetch_data.get(slot) else {
            return;
        };
        let request = Arc::clone(&task.ext.request);

        if request.options().reads_disk_cache() {
            if let Some(cache) = self.collaborators.data_cache.clone() {
                spawn_cache_lookup(
                    slot,
                    cache,
                    request.source().id().cache_key(),
                    task.token.clone(),
                    self.work_tx.clone(),
                );
                return;
            }
        }
        self.schedule_fetch(slot);
    }

    pub(crate) fn on_data_cache_lookup(&mut self, slot: TaskSlot, data: Option<Bytes>) {
        if !self.fetch_data.contains(slot) {
            return;
        }

        match data {
            Some(data) if !data.is_empty() => {
                self.counters.disk_cache_hits += 1;
                self.telemetry.emit(TelemetryEvent::CacheHit {
                    cache: CacheType::Disk,
                    layer: Layer::FetchOriginalData,
                });
                let len = data.len() as u64;
                let value = FetchedData {
                    data,
                    expected_length: Some(len),
                    cache_type: Some(CacheType::Disk),
                };
                self.emit_fetch_data(
                    slot,
                    TaskEvent::Value {
                        value,
                        is_completed: true,
                    },
                );
            }
            _ => self.schedule_fetch(slot),
        }
    }

    /// Queues the load, going through the rate limiter for network sources.
    fn schedule_fetch(&mut self, slot: TaskSlot) {
        let Some(task) = self.fetch_data.get(slot) else {
            return;
        };
        let priority = task.priority();
        let is_network = task.ext.request.source().url().is_some();

        if let (true, Some(limiter)) = (is_network, self.rate_limiter.as_mut()) {
            if limiter.admit(slot, Instant::now()).is_none() {
                self.counters.rate_limited += 1;
                self.telemetry.emit(TelemetryEvent::FetchRateLimited {
                    pending: limiter.pending(),
                });
                return;
            }
        }
        self.data_queue.enqueue(slot, priority);
    }

    /// Moves fetches whose token has arrived into the data loading queue.
    pub(crate) fn release_rate_limited(&mut self) {
        let Some(limiter) = self.rate_limiter.as_mut() else {
            return;
        };
        let pool = &self.fetch_data;
        let released = limiter.release(Instant::now(), |slot| pool.contains(*slot));

        for slot in released {
            if let Some(task) = self.fetch_data.get(slot) {
                let priority = task.priority();
                self.data_queue.enqueue(slot, priority);
            }
        }
    }

    pub(crate) fn start_fetch(&mut self, slot: TaskSlot) {
        let Some(task) = self.fetch_data.get_mut(slot) else {
            self.data_queue.finish(slot);
            return;
        };
        let request = Arc::clone(&task.ext.request);
        let priority = task.priority();
        let token = task.token.clone();

        let cache_write = if request.options().writes_disk_cache() {
            self.collaborators
                .data_cache
                .clone()
                .map(|cache| CacheWrite {
                    cache,
                    key: request.source().id().cache_key(),
                    telemetry: Arc::clone(&self.telemetry),
                })
        } else {
            None
        };

        match request.source() {
            ImageSource::Url(url) => {
                debug!(url = %url, priority = %priority, "Starting fetch");
                let (priority_tx, priority_rx) = watch::channel(priority);
                task.ext.priority_tx = Some(priority_tx);
                FetchJob {
                    slot,
                    url: url.clone(),
                    loader: Arc::clone(&self.collaborators.loader),
                    priority: priority_rx,
                    resumable: self.collaborators.resumable.clone(),
                    cache_write,
                    progressive: self.config.progressive_decoding,
                    token,
                    tx: self.work_tx.clone(),
                }
                .spawn();
            }
            ImageSource::Producer(producer) => {
                debug!(producer = producer.id(), priority = %priority, "Starting producer");
                ProduceJob {
                    slot,
                    producer: Arc::clone(producer),
                    cache_write,
                    token,
                    tx: self.work_tx.clone(),
                }
                .spawn();
            }
        }
    }

    pub(crate) fn on_data_progress(
        &mut self,
        slot: TaskSlot,
        progress: Progress,
        partial: Option<Bytes>,
    ) {
        if !self.fetch_data.contains(slot) {
            return;
        }
        self.emit_fetch_data(slot, TaskEvent::Progress(progress));

        if let Some(data) = partial {
            let value = FetchedData {
                data,
                expected_length: progress.total,
                cache_type: None,
            };
            self.emit_fetch_data(
                slot,
                TaskEvent::Value {
                    value,
                    is_completed: false,
                },
            );
        }
    }

    pub(crate) fn on_data_finished(
        &mut self,
        slot: TaskSlot,
        result: Result<FetchedData, DataLoadError>,
    ) {
        self.data_queue.finish(slot);
        if !self.fetch_data.contains(slot) {
            return;
        }

        match result {
            Ok(value) => self.emit_fetch_data(
                slot,
                TaskEvent::Value {
                    value,
                    is_completed: true,
                },
            ),
            Err(e) => {
                warn!(error = %e, "Data loading failed");
                self.emit_fetch_data(slot, TaskEvent::Error(PipelineError::DataLoadingFailed(e)));
            }
        }
    }
}
