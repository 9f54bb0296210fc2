//! Coordinator core - state and run loop.
//!
//! The [`Coordinator`] is a single tokio task that owns every pool, queue
//! and handle. Public operations reach it as [`Command`]s; spawned work
//! reports back as [`WorkMessage`]s. Because nothing else touches this
//! state, subscription, emission and disposal never race.
//!
//! Layer handlers are implemented in separate modules under `layers`:
//! - `load_image`: memory cache, processing, image handles
//! - `fetch_image`: decoding
//! - `fetch_data`: disk cache, rate limiting, fetching
//! - `load_data`: data handles
//!
//! After every message the coordinator drains the delivery worklist, so
//! events cascade up the task graph without reentrancy, then starts
//! whatever the operation queues allow.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::command::{Command, Reply};
use super::layers::{FetchDataState, FetchImageState, LoadDataState, LoadImageState};
use super::pool::{Detach, Finished, TaskPool};
use super::queue::{OperationQueue, QueueKind};
use super::rate_limiter::RateLimiter;
use super::task::{SubscriptionKey, TaskEvent, TaskRef, TaskSlot, TaskValue};
use super::work::{WorkMessage, WorkSender};
use crate::cache::{DataCaching, ImageCaching};
use crate::decode::ImageDecoding;
use crate::error::PipelineError;
use crate::event::{Event, FetchedData, ImageResponse, TaskState};
use crate::keys::{DataKey, Layer, LoadDataKey, LoadImageKey, OriginalImageKey};
use crate::loader::{DataLoader, ResumableDataStore};
use crate::pipeline::{PipelineConfig, PipelineStats, TaskId};
use crate::priority::Priority;
use crate::request::ImageRequest;
use crate::telemetry::{RequestKind, TaskOutcome, TelemetryEvent, TelemetrySink};

// =============================================================================
// Subscribers
// =============================================================================

/// Who receives events from an image-producing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageSubscriber {
    Handle(TaskId),
    LoadImage(TaskSlot),
}

impl TaskValue for ImageResponse {
    type Subscriber = ImageSubscriber;
}

/// Who receives events from a data-producing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataSubscriber {
    Handle(TaskId),
    FetchImage(TaskSlot),
    LoadData(TaskSlot),
}

impl TaskValue for FetchedData {
    type Subscriber = DataSubscriber;
}

/// An event waiting to be handed to its subscriber.
pub(crate) enum Delivery {
    Image(ImageSubscriber, TaskEvent<ImageResponse>),
    Data(DataSubscriber, TaskEvent<FetchedData>),
}

// =============================================================================
// Coordinator
// =============================================================================

/// Injected collaborators.
pub(crate) struct Collaborators {
    pub loader: Arc<dyn DataLoader>,
    pub decoder: Arc<dyn ImageDecoding>,
    pub image_cache: Option<Arc<dyn ImageCaching>>,
    pub data_cache: Option<Arc<dyn DataCaching>>,
    pub resumable: Option<Arc<ResumableDataStore>>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Bookkeeping for one caller handle.
pub(crate) struct HandleEntry<V> {
    /// Top-level task the handle subscribes to
    pub task: TaskRef,
    pub key: Option<SubscriptionKey>,
    pub priority: Priority,
    pub reply: Reply<V>,
    pub started_at: std::time::Instant,
}

#[derive(Debug, Default)]
pub(crate) struct RequestCounters {
    pub image_requests: u64,
    pub data_requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rate_limited: u64,
    pub memory_cache_hits: u64,
    pub disk_cache_hits: u64,
}

pub(crate) struct Coordinator {
    pub(super) config: PipelineConfig,

    pub(super) load_image: TaskPool<LoadImageKey, ImageResponse, LoadImageState>,
    pub(super) fetch_image: TaskPool<OriginalImageKey, ImageResponse, FetchImageState>,
    pub(super) fetch_data: TaskPool<DataKey, FetchedData, FetchDataState>,
    pub(super) load_data: TaskPool<LoadDataKey, FetchedData, LoadDataState>,

    pub(super) image_handles: HashMap<TaskId, HandleEntry<ImageResponse>>,
    pub(super) data_handles: HashMap<TaskId, HandleEntry<FetchedData>>,

    /// Set by `invalidate`; every later submission fails immediately.
    pub(super) invalidated: bool,

    pub(super) rate_limiter: Option<RateLimiter<TaskSlot>>,
    pub(super) data_queue: OperationQueue<TaskSlot>,
    pub(super) decode_queue: OperationQueue<TaskSlot>,
    pub(super) process_queue: OperationQueue<TaskSlot>,

    pub(super) collaborators: Collaborators,
    pub(super) telemetry: Arc<dyn TelemetrySink>,
    pub(super) counters: RequestCounters,

    /// Events not yet handed to their subscribers.
    pub(super) deliveries: VecDeque<Delivery>,

    pub(super) work_tx: WorkSender,
    work_rx: mpsc::UnboundedReceiver<WorkMessage>,

    /// Parent of every task token.
    root: CancellationToken,
}

impl Coordinator {
    pub(crate) fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let root = CancellationToken::new();
        let coalescing = config.coalescing;
        let default_priority = config.default_priority;
        let retained = config.retained_outcomes;
        let rate_limiter = config
            .rate_limiter
            .map(|rl| RateLimiter::new(rl.rate, rl.burst, Instant::now()));

        Self {
            load_image: TaskPool::new(
                Layer::LoadImage,
                coalescing,
                default_priority,
                retained,
                root.clone(),
            ),
            fetch_image: TaskPool::new(
                Layer::FetchOriginalImage,
                coalescing,
                default_priority,
                retained,
                root.clone(),
            ),
            fetch_data: TaskPool::new(
                Layer::FetchOriginalData,
                coalescing,
                default_priority,
                retained,
                root.clone(),
            ),
            load_data: TaskPool::new(
                Layer::LoadData,
                coalescing,
                default_priority,
                retained,
                root.clone(),
            ),
            image_handles: HashMap::new(),
            data_handles: HashMap::new(),
            invalidated: false,
            rate_limiter,
            data_queue: OperationQueue::new(
                QueueKind::DataLoading,
                config.data_loading_concurrency,
            ),
            decode_queue: OperationQueue::new(QueueKind::Decoding, config.decoding_concurrency),
            process_queue: OperationQueue::new(
                QueueKind::Processing,
                config.processing_concurrency,
            ),
            telemetry: Arc::clone(&collaborators.telemetry),
            collaborators,
            counters: RequestCounters::default(),
            deliveries: VecDeque::new(),
            work_tx,
            work_rx,
            root,
            config,
        }
    }

    /// Runs until every command sender is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            coalescing = self.config.coalescing,
            rate_limited = self.rate_limiter.is_some(),
            "Pipeline coordinator started"
        );

        loop {
            let wakeup = self
                .rate_limiter
                .as_ref()
                .and_then(|limiter| limiter.next_wakeup(Instant::now()));

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(message) = self.work_rx.recv() => self.handle_work(message),

                _ = tokio::time::sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {
                    self.release_rate_limited();
                }
            }

            self.drain();
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadImage { id, request, reply } => self.submit_image(id, request, reply),
            Command::LoadData { id, request, reply } => self.submit_data(id, request, reply),
            Command::Cancel { id } => self.cancel(id),
            Command::SetPriority { id, priority } => self.set_priority(id, priority),
            Command::Invalidate => self.invalidate(),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn handle_work(&mut self, message: WorkMessage) {
        match message {
            WorkMessage::DataCacheLookup { slot, data } => self.on_data_cache_lookup(slot, data),
            WorkMessage::DataProgress {
                slot,
                progress,
                partial,
            } => self.on_data_progress(slot, progress, partial),
            WorkMessage::DataFinished { slot, result } => self.on_data_finished(slot, result),
            WorkMessage::Decoded {
                slot,
                kind,
                data_len,
                result,
            } => self.on_decoded(slot, kind, data_len, result),
            WorkMessage::Processed {
                slot,
                is_final,
                cache_type,
                result,
            } => self.on_processed(slot, is_final, cache_type, result),
        }
    }

    /// Hands queued events to their subscribers, including events those
    /// handlers emit in turn, then starts ready operations.
    fn drain(&mut self) {
        while let Some(delivery) = self.deliveries.pop_front() {
            match delivery {
                Delivery::Image(ImageSubscriber::Handle(id), event) => {
                    self.deliver_image_to_handle(id, event)
                }
                Delivery::Image(ImageSubscriber::LoadImage(slot), event) => {
                    self.on_original_image_event(slot, event)
                }
                Delivery::Data(DataSubscriber::Handle(id), event) => {
                    self.deliver_data_to_handle(id, event)
                }
                Delivery::Data(DataSubscriber::FetchImage(slot), event) => {
                    self.on_original_data_event(slot, event)
                }
                Delivery::Data(DataSubscriber::LoadData(slot), event) => {
                    self.on_load_data_event(slot, event)
                }
            }
        }
        self.start_ready_operations();
    }

    fn start_ready_operations(&mut self) {
        while let Some((slot, priority)) = self.data_queue.next_ready() {
            self.operation_started(QueueKind::DataLoading, priority);
            self.start_fetch(slot);
        }
        while let Some((slot, priority)) = self.decode_queue.next_ready() {
            self.operation_started(QueueKind::Decoding, priority);
            self.start_decode(slot);
        }
        while let Some((slot, priority)) = self.process_queue.next_ready() {
            self.operation_started(QueueKind::Processing, priority);
            self.start_process(slot);
        }
    }

    fn operation_started(&self, queue: QueueKind, priority: Priority) {
        let queue_depth = match queue {
            QueueKind::DataLoading => self.data_queue.stats().pending,
            QueueKind::Decoding => self.decode_queue.stats().pending,
            QueueKind::Processing => self.process_queue.stats().pending,
        };
        self.telemetry.emit(TelemetryEvent::OperationStarted {
            queue,
            priority,
            queue_depth,
        });
    }

    fn shutdown(&mut self) {
        info!(
            active_requests = self.image_handles.len() + self.data_handles.len(),
            "Pipeline coordinator stopping"
        );
        self.load_image.cancel_all();
        self.fetch_image.cancel_all();
        self.fetch_data.cancel_all();
        self.load_data.cancel_all();
        self.root.cancel();
    }

    // =========================================================================
    // Task graph plumbing
    // =========================================================================

    /// Records a new subscription on `task` and propagates a raised
    /// priority to the work below it.
    pub(super) fn on_joined(
        &mut self,
        task: TaskRef,
        created: bool,
        changed: Option<Priority>,
        request: &ImageRequest,
    ) {
        let layer = task.layer();
        if created {
            self.telemetry.emit(TelemetryEvent::TaskCreated {
                layer,
                source: request.source().id().to_string(),
            });
            return;
        }

        self.telemetry.emit(TelemetryEvent::TaskCoalesced {
            layer,
            subscribers: self.subscriber_count(task),
        });
        if let Some(priority) = changed {
            self.propagate_priority(task, priority);
        }
    }

    pub(super) fn set_dependency(&mut self, task: TaskRef, dependency: (TaskRef, SubscriptionKey)) {
        let field = match task {
            TaskRef::LoadImage(slot) => self.load_image.get_mut(slot).map(|t| &mut t.dependency),
            TaskRef::FetchImage(slot) => self.fetch_image.get_mut(slot).map(|t| &mut t.dependency),
            TaskRef::FetchData(slot) => self.fetch_data.get_mut(slot).map(|t| &mut t.dependency),
            TaskRef::LoadData(slot) => self.load_data.get_mut(slot).map(|t| &mut t.dependency),
        };
        if let Some(field) = field {
            *field = Some(dependency);
        }
    }

    fn subscriber_count(&self, task: TaskRef) -> usize {
        match task {
            TaskRef::LoadImage(slot) => self.load_image.get(slot).map(|t| t.subscriber_count()),
            TaskRef::FetchImage(slot) => self.fetch_image.get(slot).map(|t| t.subscriber_count()),
            TaskRef::FetchData(slot) => self.fetch_data.get(slot).map(|t| t.subscriber_count()),
            TaskRef::LoadData(slot) => self.load_data.get(slot).map(|t| t.subscriber_count()),
        }
        .unwrap_or(0)
    }

    /// Removes one subscription. A task left without subscribers is
    /// disposed, which releases its own subscription below, and so on down
    /// the graph.
    pub(super) fn detach(&mut self, mut task: TaskRef, mut key: SubscriptionKey) {
        loop {
            let detached = match task {
                TaskRef::LoadImage(slot) => self.load_image.unsubscribe(slot, key),
                TaskRef::FetchImage(slot) => self.fetch_image.unsubscribe(slot, key),
                TaskRef::FetchData(slot) => self.fetch_data.unsubscribe(slot, key),
                TaskRef::LoadData(slot) => self.load_data.unsubscribe(slot, key),
            };

            match detached {
                Detach::Missing => return,
                Detach::Remaining { priority } => {
                    if let Some(priority) = priority {
                        self.propagate_priority(task, priority);
                    }
                    return;
                }
                Detach::Disposed { dependency } => {
                    debug!(layer = %task.layer(), "Task disposed without subscribers");
                    self.release_operations(task);
                    self.telemetry.emit(TelemetryEvent::TaskFinished {
                        layer: task.layer(),
                        outcome: TaskOutcome::Cancelled,
                    });
                    match dependency {
                        Some((lower, lower_key)) => {
                            task = lower;
                            key = lower_key;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn set_subscription_priority(
        &mut self,
        task: TaskRef,
        key: SubscriptionKey,
        priority: Priority,
    ) -> Option<Priority> {
        match task {
            TaskRef::LoadImage(slot) => self.load_image.set_priority(slot, key, priority),
            TaskRef::FetchImage(slot) => self.fetch_image.set_priority(slot, key, priority),
            TaskRef::FetchData(slot) => self.fetch_data.set_priority(slot, key, priority),
            TaskRef::LoadData(slot) => self.load_data.set_priority(slot, key, priority),
        }
    }

    /// Applies a task's new effective priority to its queued operation and
    /// to its subscription on the task below, as far down as it changes
    /// anything.
    pub(super) fn propagate_priority(&mut self, mut task: TaskRef, mut priority: Priority) {
        loop {
            let dependency = match task {
                TaskRef::LoadImage(slot) => {
                    self.process_queue.set_priority(slot, priority);
                    self.load_image.get(slot).and_then(|t| t.dependency)
                }
                TaskRef::FetchImage(slot) => {
                    self.decode_queue.set_priority(slot, priority);
                    self.fetch_image.get(slot).and_then(|t| t.dependency)
                }
                TaskRef::FetchData(slot) => {
                    self.data_queue.set_priority(slot, priority);
                    if let Some(tx) = self
                        .fetch_data
                        .get(slot)
                        .and_then(|t| t.ext.priority_tx.as_ref())
                    {
                        tx.send_replace(priority);
                    }
                    None
                }
                TaskRef::LoadData(slot) => self.load_data.get(slot).and_then(|t| t.dependency),
            };

            let Some((lower, key)) = dependency else {
                return;
            };
            match self.set_subscription_priority(lower, key, priority) {
                Some(changed) => {
                    task = lower;
                    priority = changed;
                }
                None => return,
            }
        }
    }

    /// Drops operations owned by a task that ended. Decode and process jobs
    /// run on the blocking pool and cannot be stopped, so a running one keeps
    /// its slot until its result message arrives.
    fn release_operations(&mut self, task: TaskRef) {
        match task {
            TaskRef::LoadImage(slot) => {
                self.process_queue.remove_pending(slot);
            }
            TaskRef::FetchImage(slot) => {
                self.decode_queue.remove_pending(slot);
            }
            TaskRef::FetchData(slot) => {
                self.data_queue.remove(slot);
            }
            TaskRef::LoadData(_) => {}
        }
    }

    fn on_task_finished(&mut self, task: TaskRef, finished: Finished) {
        self.release_operations(task);
        self.telemetry.emit(TelemetryEvent::TaskFinished {
            layer: task.layer(),
            outcome: finished.outcome,
        });
        if let Some((lower, key)) = finished.dependency {
            self.detach(lower, key);
        }
    }

    pub(super) fn emit_load_image(&mut self, slot: TaskSlot, event: TaskEvent<ImageResponse>) {
        let emitted = self.load_image.emit(slot, event);
        self.deliveries.extend(
            emitted
                .deliveries
                .into_iter()
                .map(|(to, event)| Delivery::Image(to, event)),
        );
        if let Some(finished) = emitted.finished {
            self.on_task_finished(TaskRef::LoadImage(slot), finished);
        }
    }

    pub(super) fn emit_fetch_image(&mut self, slot: TaskSlot, event: TaskEvent<ImageResponse>) {
        let emitted = self.fetch_image.emit(slot, event);
        self.deliveries.extend(
            emitted
                .deliveries
                .into_iter()
                .map(|(to, event)| Delivery::Image(to, event)),
        );
        if let Some(finished) = emitted.finished {
            self.on_task_finished(TaskRef::FetchImage(slot), finished);
        }
    }

    pub(super) fn emit_fetch_data(&mut self, slot: TaskSlot, event: TaskEvent<FetchedData>) {
        let emitted = self.fetch_data.emit(slot, event);
        self.deliveries.extend(
            emitted
                .deliveries
                .into_iter()
                .map(|(to, event)| Delivery::Data(to, event)),
        );
        if let Some(finished) = emitted.finished {
            self.on_task_finished(TaskRef::FetchData(slot), finished);
        }
    }

    pub(super) fn emit_load_data(&mut self, slot: TaskSlot, event: TaskEvent<FetchedData>) {
        let emitted = self.load_data.emit(slot, event);
        self.deliveries.extend(
            emitted
                .deliveries
                .into_iter()
                .map(|(to, event)| Delivery::Data(to, event)),
        );
        if let Some(finished) = emitted.finished {
            self.on_task_finished(TaskRef::LoadData(slot), finished);
        }
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Common start of every submission. Returns the request's priority, or
    /// `None` if the pipeline is invalidated and the request already failed.
    pub(super) fn admit_request<V>(
        &mut self,
        id: TaskId,
        request: &ImageRequest,
        kind: RequestKind,
        reply: Reply<V>,
    ) -> Option<(Priority, Reply<V>)> {
        let priority = request.priority().unwrap_or(self.config.default_priority);
        self.telemetry.emit(TelemetryEvent::RequestSubmitted {
            task_id: id,
            kind,
            source: request.source().id().to_string(),
            priority,
        });

        if self.invalidated {
            debug!(task_id = %id, "Rejecting request on invalidated pipeline");
            self.counters.failed += 1;
            reply.fail(PipelineError::PipelineInvalidated);
            return None;
        }
        Some((priority, reply))
    }

    fn deliver_image_to_handle(&mut self, id: TaskId, event: TaskEvent<ImageResponse>) {
        if let Some((outcome, elapsed)) = deliver_to_handle(&mut self.image_handles, id, event) {
            self.record_end(id, outcome, elapsed);
        }
    }

    fn deliver_data_to_handle(&mut self, id: TaskId, event: TaskEvent<FetchedData>) {
        if let Some((outcome, elapsed)) = deliver_to_handle(&mut self.data_handles, id, event) {
            self.record_end(id, outcome, elapsed);
        }
    }

    fn record_end(&mut self, id: TaskId, outcome: TaskOutcome, duration: Duration) {
        match outcome {
            TaskOutcome::Succeeded | TaskOutcome::Failed => {
                let success = outcome == TaskOutcome::Succeeded;
                if success {
                    self.counters.succeeded += 1;
                } else {
                    self.counters.failed += 1;
                }
                self.telemetry.emit(TelemetryEvent::RequestCompleted {
                    task_id: id,
                    success,
                    duration,
                });
            }
            TaskOutcome::Cancelled => {
                self.counters.cancelled += 1;
                self.telemetry.emit(TelemetryEvent::RequestCancelled {
                    task_id: id,
                    duration,
                });
            }
        }
    }

    fn cancel(&mut self, id: TaskId) {
        if let Some(entry) = self.image_handles.remove(&id) {
            self.cancel_entry(id, entry);
        } else if let Some(entry) = self.data_handles.remove(&id) {
            self.cancel_entry(id, entry);
        }
    }

    fn cancel_entry<V>(&mut self, id: TaskId, entry: HandleEntry<V>) {
        debug!(task_id = %id, "Request cancelled");
        if let Some(key) = entry.key {
            self.detach(entry.task, key);
        }
        let _ = entry.reply.events.send(Event::Cancelled);
        entry.reply.state.send_replace(TaskState::Cancelled);
        self.record_end(id, TaskOutcome::Cancelled, entry.started_at.elapsed());
    }

    fn set_priority(&mut self, id: TaskId, priority: Priority) {
        let target = if let Some(entry) = self.image_handles.get_mut(&id) {
            update_handle_priority(entry, priority)
        } else if let Some(entry) = self.data_handles.get_mut(&id) {
            update_handle_priority(entry, priority)
        } else {
            None
        };

        let Some((task, key)) = target else {
            return;
        };
        if let Some(changed) = self.set_subscription_priority(task, key, priority) {
            self.propagate_priority(task, changed);
        }
    }

    /// Fails every running request and rejects all future ones.
    fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        self.invalidated = true;

        let mut image_ids: Vec<TaskId> = self.image_handles.keys().copied().collect();
        image_ids.sort();
        let mut data_ids: Vec<TaskId> = self.data_handles.keys().copied().collect();
        data_ids.sort();
        let failed_requests = image_ids.len() + data_ids.len();

        for id in image_ids {
            if let Some(entry) = self.image_handles.remove(&id) {
                self.fail_entry(id, entry);
            }
        }
        for id in data_ids {
            if let Some(entry) = self.data_handles.remove(&id) {
                self.fail_entry(id, entry);
            }
        }

        info!(failed_requests, "Pipeline invalidated");
        self.telemetry
            .emit(TelemetryEvent::PipelineInvalidated { failed_requests });
    }

    fn fail_entry<V>(&mut self, id: TaskId, entry: HandleEntry<V>) {
        if let Some(key) = entry.key {
            self.detach(entry.task, key);
        }
        let elapsed = entry.started_at.elapsed();
        entry.reply.fail(PipelineError::PipelineInvalidated);
        self.record_end(id, TaskOutcome::Failed, elapsed);
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            image_requests: self.counters.image_requests,
            data_requests: self.counters.data_requests,
            succeeded: self.counters.succeeded,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            active: self.image_handles.len() + self.data_handles.len(),
            load_image: self.load_image.stats(),
            fetch_original_image: self.fetch_image.stats(),
            fetch_original_data: self.fetch_data.stats(),
            load_data: self.load_data.stats(),
            data_loading_queue: self.data_queue.stats(),
            decoding_queue: self.decode_queue.stats(),
            processing_queue: self.process_queue.stats(),
            rate_limited: self.counters.rate_limited,
            rate_limiter_pending: self
                .rate_limiter
                .as_ref()
                .map(|limiter| limiter.pending())
                .unwrap_or(0),
            memory_cache_hits: self.counters.memory_cache_hits,
            disk_cache_hits: self.counters.disk_cache_hits,
            invalidated: self.invalidated,
        }
    }
}

fn update_handle_priority<V>(
    entry: &mut HandleEntry<V>,
    priority: Priority,
) -> Option<(TaskRef, SubscriptionKey)> {
    if entry.priority == priority {
        return None;
    }
    entry.priority = priority;
    entry.key.map(|key| (entry.task, key))
}

/// Forwards a task event to a caller handle.
///
/// A terminal event removes the handle's entry before it is sent, so the
/// handle can never see anything after it. Returns how the request ended
/// when the event was terminal.
fn deliver_to_handle<V>(
    handles: &mut HashMap<TaskId, HandleEntry<V>>,
    id: TaskId,
    event: TaskEvent<V>,
) -> Option<(TaskOutcome, Duration)> {
    let event = match event {
        TaskEvent::Progress(progress) => Event::Progress(progress),
        TaskEvent::Value {
            value,
            is_completed: false,
        } => Event::Preview(value),
        TaskEvent::Value {
            value,
            is_completed: true,
        } => Event::Finished(Ok(value)),
        TaskEvent::Error(error) => Event::Finished(Err(error)),
        TaskEvent::Cancelled => Event::Cancelled,
    };

    if !event.is_terminal() {
        if let Some(entry) = handles.get(&id) {
            let _ = entry.reply.events.send(event);
        }
        return None;
    }

    let entry = handles.remove(&id)?;
    let (outcome, state) = match &event {
        Event::Finished(Ok(_)) => (TaskOutcome::Succeeded, TaskState::Completed),
        Event::Finished(Err(_)) => (TaskOutcome::Failed, TaskState::Completed),
        _ => (TaskOutcome::Cancelled, TaskState::Cancelled),
    };
    let _ = entry.reply.events.send(event);
    entry.reply.state.send_replace(state);
    Some((outcome, entry.started_at.elapsed()))
}
