//! Caller-facing task handles.
//!
//! A [`TaskHandle`] is returned for every submitted request. It exposes
//! the request's state, its event stream, and the two controls a caller
//! has over running work: cancellation and reprioritization.
//!
//! # Example
//!
//! ```ignore
//! use imagepipe::{ImagePipeline, ImageRequest, Event, Priority};
//!
//! let mut task = pipeline.load_image(ImageRequest::new(url));
//! task.set_priority(Priority::High);
//!
//! while let Some(event) = task.next_event().await {
//!     match event {
//!         Event::Progress(progress) => println!("{}", progress),
//!         Event::Preview(_) => {}
//!         Event::Finished(result) => return result,
//!         Event::Cancelled => break,
//!     }
//! }
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};

use crate::engine::{Command, CommandSender};
use crate::error::PipelineError;
use crate::event::{Event, FetchedData, ImageResponse, TaskState};
use crate::priority::Priority;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a submitted request.
///
/// Ids increase monotonically across every pipeline in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Handle to a request producing a decoded image.
pub type ImageTask = TaskHandle<ImageResponse>;

/// Handle to a request producing encoded bytes.
pub type DataTask = TaskHandle<FetchedData>;

/// Handle to one submitted request.
///
/// Events arrive in emission order and end with exactly one terminal event.
/// Dropping the handle does not cancel the request; call
/// [`cancel`](Self::cancel) to release the work.
pub struct TaskHandle<V> {
    id: TaskId,
    commands: CommandSender,
    events: mpsc::UnboundedReceiver<Event<V>>,
    state: watch::Receiver<TaskState>,
    /// A terminal event was returned
    done: bool,
}

impl<V> TaskHandle<V> {
    pub(crate) fn new(
        id: TaskId,
        commands: CommandSender,
        events: mpsc::UnboundedReceiver<Event<V>>,
        state: watch::Receiver<TaskState>,
    ) -> Self {
        Self {
            id,
            commands,
            events,
            state,
            done: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the current state.
    ///
    /// The state is written by the pipeline, so it may lag behind events
    /// already sitting in the stream.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Cancels the request. No-op once the request has ended.
    ///
    /// The handle receives [`Event::Cancelled`]; other requests sharing
    /// the same work keep running.
    pub fn cancel(&self) {
        if !self.state().is_terminal() {
            let _ = self.commands.send(Command::Cancel { id: self.id });
        }
    }

    /// Changes the request's priority. No-op once the request has ended.
    pub fn set_priority(&self, priority: Priority) {
        if !self.state().is_terminal() {
            let _ = self.commands.send(Command::SetPriority {
                id: self.id,
                priority,
            });
        }
    }

    /// Waits for the next event. Returns `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<Event<V>> {
        if self.done {
            return None;
        }
        let event = self.events.recv().await;
        self.observe(event)
    }

    /// Waits for the final result, skipping progress and previews.
    ///
    /// Cancellation is reported as [`PipelineError::Cancelled`].
    pub async fn response(mut self) -> Result<V, PipelineError> {
        while let Some(event) = self.next_event().await {
            match event {
                Event::Finished(result) => return result,
                Event::Cancelled => return Err(PipelineError::Cancelled),
                Event::Progress(_) | Event::Preview(_) => {}
            }
        }
        Err(PipelineError::Cancelled)
    }

    fn observe(&mut self, event: Option<Event<V>>) -> Option<Event<V>> {
        match &event {
            Some(event) if event.is_terminal() => self.done = true,
            None => self.done = true,
            _ => {}
        }
        event
    }
}

impl<V> Unpin for TaskHandle<V> {}

impl<V> Stream for TaskHandle<V> {
    type Item = Event<V>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.events.poll_recv(cx) {
            Poll::Ready(event) => Poll::Ready(this.observe(event)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V> fmt::Debug for TaskHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
