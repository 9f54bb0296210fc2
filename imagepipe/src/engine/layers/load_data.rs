//! Load-data layer: encoded bytes delivered to data handles.

use std::sync::Arc;

use tracing::debug;

use crate::engine::command::Reply;
use crate::engine::coordinator::{Coordinator, DataSubscriber, Delivery, HandleEntry};
use crate::engine::pool::Attach;
use crate::engine::task::{TaskEvent, TaskRef, TaskSlot};
use crate::event::{FetchedData, TaskState};
use crate::keys::LoadDataKey;
use crate::pipeline::TaskId;
use crate::request::ImageRequest;
use crate::telemetry::RequestKind;

pub(crate) struct LoadDataState {
    pub(crate) request: Arc<ImageRequest>,
}

impl Coordinator {
    pub(crate) fn submit_data(
        &mut self,
        id: TaskId,
        request: ImageRequest,
        reply: Reply<FetchedData>,
    ) {
        self.counters.data_requests += 1;
        let Some((priority, reply)) = self.admit_request(id, &request, RequestKind::Data, reply)
        else {
            return;
        };

        let request = Arc::new(request);
        let joined = self.load_data.join(
            LoadDataKey::from(&*request),
            DataSubscriber::Handle(id),
            priority,
            || LoadDataState {
                request: Arc::clone(&request),
            },
        );
        let task = TaskRef::LoadData(joined.slot);

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
                        .map(|event| Delivery::Data(DataSubscriber::Handle(id), event)),
                );
                self.on_joined(task, joined.created, changed, &request);
                Some(key)
            }
            Attach::Finished(event) => {
                self.deliveries
                    .push_back(Delivery::Data(DataSubscriber::Handle(id), event));
                None
            }
        };

        debug!(
            task_id = %id,
            source = %request.source().id(),
            coalesced = !joined.created,
            "Data request started"
        );
        self.data_handles.insert(
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
            self.subscribe_to_data(task, DataSubscriber::LoadData(joined.slot), &request, priority);
        }
    }

    /// Forwards data events to the handles. Partial data is only useful
    /// for decoding previews, so it is not passed on.
    pub(crate) fn on_load_data_event(&mut self, slot: TaskSlot, event: TaskEvent<FetchedData>) {
        match event {
            TaskEvent::Value {
                is_completed: false,
                ..
            } => {}
            TaskEvent::Value {
                value,
                is_completed: true,
            } => {
                if let Some(task) = self.load_data.get(slot) {
                    debug!(
                        slot,
                        source = %task.ext.request.source().id(),
                        bytes = value.len(),
                        cache = ?value.cache_type,
                        "Data loaded"
                    );
                }
                self.emit_load_data(
                    slot,
                    TaskEvent::Value {
                        value,
                        is_completed: true,
                    },
                );
            }
            event => self.emit_load_data(slot, event),
        }
    }
}
