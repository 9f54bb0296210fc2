//! Messages from the public API to the coordinator.

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::PipelineError;
use crate::event::{Event, FetchedData, ImageResponse, TaskState};
use crate::pipeline::{PipelineStats, TaskId};
use crate::priority::Priority;
use crate::request::ImageRequest;

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;

/// Where the coordinator reports one request's events and state.
pub(crate) struct Reply<V> {
    pub events: mpsc::UnboundedSender<Event<V>>,
    pub state: watch::Sender<TaskState>,
}

impl<V> Reply<V> {
    /// Ends the request with `error` without it ever starting.
    pub fn fail(self, error: PipelineError) {
        let _ = self.events.send(Event::Finished(Err(error)));
        self.state.send_replace(TaskState::Completed);
    }
}

pub(crate) enum Command {
    LoadImage {
        id: TaskId,
        request: ImageRequest,
        reply: Reply<ImageResponse>,
    },
    LoadData {
        id: TaskId,
        request: ImageRequest,
        reply: Reply<FetchedData>,
    },
    Cancel {
        id: TaskId,
    },
    SetPriority {
        id: TaskId,
        priority: Priority,
    },
    Invalidate,
    Stats {
        reply: oneshot::Sender<PipelineStats>,
    },
}

impl Command {
    /// Fails a submission that never reached the coordinator.
    pub fn reject(self) {
        match self {
            Command::LoadImage { reply, .. } => reply.fail(PipelineError::PipelineInvalidated),
            Command::LoadData { reply, .. } => reply.fail(PipelineError::PipelineInvalidated),
            _ => {}
        }
    }
}
