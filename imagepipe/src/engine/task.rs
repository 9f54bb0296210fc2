//! Subscribable unit of work.
//!
//! An [`AsyncTask`] is shared by every subscriber whose request produced
//! the same key. It owns the subscriber list, the effective priority and the
//! last progress/preview so late joiners can catch up. It does not own any
//! work itself: the coordinator drives it by calling [`AsyncTask::emit`].
//!
//! ```text
//!                   subscribe ──► catch-up (last progress, last preview)
//!   ┌──────────┐    emit(Progress | Value{partial}) ──► every subscriber
//!   │ Running  │──► emit(Value{final} | Error | Cancelled)
//!   └──────────┘         │
//!                        ▼ every subscriber, then subscriptions cleared
//! ```

use std::collections::BTreeMap;
use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::event::Progress;
use crate::keys::Layer;
use crate::priority::Priority;

/// Index of a task inside its pool.
pub(crate) type TaskSlot = u64;

/// Identifies one subscription on one task.
pub(crate) type SubscriptionKey = u64;

/// A task in any of the four pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TaskRef {
    LoadImage(TaskSlot),
    FetchImage(TaskSlot),
    FetchData(TaskSlot),
    LoadData(TaskSlot),
}

impl TaskRef {
    pub(crate) fn layer(self) -> Layer {
        match self {
            TaskRef::LoadImage(_) => Layer::LoadImage,
            TaskRef::FetchImage(_) => Layer::FetchOriginalImage,
            TaskRef::FetchData(_) => Layer::FetchOriginalData,
            TaskRef::LoadData(_) => Layer::LoadData,
        }
    }
}

/// Event flowing from a task to its subscribers.
#[derive(Debug, Clone)]
pub(crate) enum TaskEvent<V> {
    Progress(Progress),
    Value { value: V, is_completed: bool },
    Error(PipelineError),
    Cancelled,
}

impl<V> TaskEvent<V> {
    pub(crate) fn is_terminal(&self) -> bool {
        match self {
            TaskEvent::Progress(_) => false,
            TaskEvent::Value { is_completed, .. } => *is_completed,
            TaskEvent::Error(_) | TaskEvent::Cancelled => true,
        }
    }
}

/// A value type produced by tasks, tied to the kinds of subscriber that
/// can receive it.
pub(crate) trait TaskValue: Clone + Send + 'static {
    type Subscriber: Copy + Eq + fmt::Debug;
}

#[derive(Debug, Clone, Copy)]
struct Subscription<S> {
    subscriber: S,
    priority: Priority,
}

/// Result of attaching a subscriber to a running task.
pub(crate) struct Subscribed<V> {
    pub key: SubscriptionKey,
    /// Events the new subscriber missed
    pub catch_up: Vec<TaskEvent<V>>,
    /// New effective priority, if it changed
    pub priority: Option<Priority>,
}

/// Result of removing a subscription.
pub(crate) struct Unsubscribed {
    pub remaining: usize,
    /// New effective priority, if it changed
    pub priority: Option<Priority>,
}

pub(crate) struct AsyncTask<V: TaskValue, X> {
    subscriptions: BTreeMap<SubscriptionKey, Subscription<V::Subscriber>>,
    next_key: SubscriptionKey,
    default_priority: Priority,
    priority: Priority,
    finished: bool,
    last_progress: Option<Progress>,
    last_preview: Option<V>,
    /// Subscription this task holds on the task below it
    pub dependency: Option<(TaskRef, SubscriptionKey)>,
    /// Cancelled when the task is disposed
    pub token: CancellationToken,
    /// Layer-specific state
    pub ext: X,
}

impl<V: TaskValue, X> AsyncTask<V, X> {
    pub fn new(default_priority: Priority, token: CancellationToken, ext: X) -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            next_key: 0,
            default_priority,
            priority: default_priority,
            finished: false,
            last_progress: None,
            last_preview: None,
            dependency: None,
            token,
            ext,
        }
    }

    /// Max over subscriber priorities, or the default with no subscribers.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn subscribe(&mut self, subscriber: V::Subscriber, priority: Priority) -> Subscribed<V> {
        let key = self.next_key;
        self.next_key += 1;
        self.subscriptions.insert(
            key,
            Subscription {
                subscriber,
                priority,
            },
        );

        let mut catch_up = Vec::new();
        if let Some(progress) = self.last_progress {
            catch_up.push(TaskEvent::Progress(progress));
        }
        if let Some(preview) = &self.last_preview {
            catch_up.push(TaskEvent::Value {
                value: preview.clone(),
                is_completed: false,
            });
        }

        Subscribed {
            key,
            catch_up,
            priority: self.recompute_priority(),
        }
    }

    /// Removes a subscription. Returns `None` if the key is unknown, which
    /// makes repeated unsubscribes harmless.
    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> Option<Unsubscribed> {
        self.subscriptions.remove(&key)?;
        Some(Unsubscribed {
            remaining: self.subscriptions.len(),
            priority: self.recompute_priority(),
        })
    }

    /// Changes one subscription's priority. Returns the new effective
    /// priority if it changed.
    pub fn set_priority(&mut self, key: SubscriptionKey, priority: Priority) -> Option<Priority> {
        let subscription = self.subscriptions.get_mut(&key)?;
        if subscription.priority == priority {
            return None;
        }
        subscription.priority = priority;
        self.recompute_priority()
    }

    fn recompute_priority(&mut self) -> Option<Priority> {
        let priority = self
            .subscriptions
            .values()
            .map(|s| s.priority)
            .max()
            .unwrap_or(self.default_priority);
        if priority == self.priority {
            None
        } else {
            self.priority = priority;
            Some(priority)
        }
    }

    /// Fans an event out to every subscriber, in subscription order.
    ///
    /// Nothing is emitted after a terminal event. Progress that goes
    /// backwards is dropped. A terminal event clears the subscriber list.
    pub fn emit(&mut self, event: TaskEvent<V>) -> Vec<(V::Subscriber, TaskEvent<V>)> {
        if self.finished {
            return Vec::new();
        }

        match &event {
            TaskEvent::Progress(progress) => {
                if let Some(last) = self.last_progress {
                    if progress.completed < last.completed {
                        return Vec::new();
                    }
                }
                self.last_progress = Some(*progress);
            }
            TaskEvent::Value {
                value,
                is_completed: false,
            } => {
                self.last_preview = Some(value.clone());
            }
            _ => {}
        }

        let deliveries = self
            .subscriptions
            .values()
            .map(|s| (s.subscriber, event.clone()))
            .collect();

        if event.is_terminal() {
            self.finished = true;
            self.subscriptions.clear();
            self.last_preview = None;
        }
        deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Val(u32);

    impl TaskValue for Val {
        type Subscriber = u32;
    }

    fn task() -> AsyncTask<Val, ()> {
        AsyncTask::new(Priority::Normal, CancellationToken::new(), ())
    }

    fn progress(completed: u64) -> TaskEvent<Val> {
        TaskEvent::Progress(Progress::new(completed, Some(100)))
    }

    #[test]
    fn test_priority_is_max_of_subscribers() {
        let mut task = task();
        let low = task.subscribe(1, Priority::Low);
        assert_eq!(low.priority, Some(Priority::Low));

        let high = task.subscribe(2, Priority::High);
        assert_eq!(high.priority, Some(Priority::High));
        assert_eq!(task.priority(), Priority::High);

        let removed = task.unsubscribe(high.key).unwrap();
        assert_eq!(removed.remaining, 1);
        assert_eq!(removed.priority, Some(Priority::Low));
    }

    #[test]
    fn test_priority_falls_back_to_default() {
        let mut task = task();
        let sub = task.subscribe(1, Priority::VeryHigh);
        let removed = task.unsubscribe(sub.key).unwrap();
        assert_eq!(removed.remaining, 0);
        assert_eq!(task.priority(), Priority::Normal);
    }

    #[test]
    fn test_set_priority_reports_only_changes() {
        let mut task = task();
        let a = task.subscribe(1, Priority::High);
        let b = task.subscribe(2, Priority::Low);

        // Raising the lower subscriber below the max changes nothing
        assert_eq!(task.set_priority(b.key, Priority::Normal), None);
        assert_eq!(task.set_priority(a.key, Priority::VeryHigh), Some(Priority::VeryHigh));
        assert_eq!(task.set_priority(a.key, Priority::VeryHigh), None);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut task = task();
        let sub = task.subscribe(1, Priority::Normal);
        assert!(task.unsubscribe(sub.key).is_some());
        assert!(task.unsubscribe(sub.key).is_none());
    }

    #[test]
    fn test_fan_out_in_subscription_order() {
        let mut task = task();
        task.subscribe(7, Priority::Normal);
        task.subscribe(3, Priority::Normal);

        let delivered: Vec<u32> = task.emit(progress(10)).into_iter().map(|(s, _)| s).collect();
        assert_eq!(delivered, vec![7, 3]);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut task = task();
        task.subscribe(1, Priority::Normal);

        assert_eq!(task.emit(progress(50)).len(), 1);
        assert!(task.emit(progress(40)).is_empty());
        assert_eq!(task.emit(progress(50)).len(), 1);
    }

    #[test]
    fn test_late_subscriber_catches_up() {
        let mut task = task();
        task.subscribe(1, Priority::Normal);
        task.emit(progress(30));
        task.emit(TaskEvent::Value {
            value: Val(1),
            is_completed: false,
        });

        let late = task.subscribe(2, Priority::Normal);
        assert_eq!(late.catch_up.len(), 2);
        assert!(matches!(late.catch_up[0], TaskEvent::Progress(p) if p.completed == 30));
        assert!(matches!(
            &late.catch_up[1],
            TaskEvent::Value { value: Val(1), is_completed: false }
        ));
    }

    #[test]
    fn test_nothing_after_terminal() {
        let mut task = task();
        task.subscribe(1, Priority::Normal);

        let finished = task.emit(TaskEvent::Value {
            value: Val(9),
            is_completed: true,
        });
        assert_eq!(finished.len(), 1);
        assert!(task.is_finished());
        assert_eq!(task.subscriber_count(), 0);

        assert!(task.emit(progress(100)).is_empty());
        assert!(task.emit(TaskEvent::Cancelled).is_empty());
    }
}
