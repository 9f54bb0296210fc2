//! Keyed pool of coalescing tasks for one layer.
//!
//! The pool maps keys to live tasks so equal requests share one task.
//! Terminal tasks leave the key map immediately, so a request arriving after
//! completion starts fresh work. Their terminal event is kept in a small
//! ring so a subscription racing with completion still gets an outcome.
//!
//! With coalescing disabled every request gets its own task and the key map
//! stays empty.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::task::{AsyncTask, SubscriptionKey, TaskEvent, TaskRef, TaskSlot, TaskValue};
use crate::keys::Layer;
use crate::priority::Priority;
use crate::telemetry::TaskOutcome;

/// Counters for one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    /// Tasks created
    pub created: u64,
    /// Subscriptions that joined an existing task
    pub coalesced: u64,
    /// Tasks that succeeded
    pub succeeded: u64,
    /// Tasks that failed
    pub failed: u64,
    /// Tasks cancelled, including those disposed for lack of subscribers
    pub cancelled: u64,
    /// Tasks currently live
    pub live: usize,
}

/// Outcome of subscribing to a slot.
pub(crate) enum Attach<V> {
    Attached {
        key: SubscriptionKey,
        catch_up: Vec<TaskEvent<V>>,
        priority: Option<Priority>,
    },
    /// The task already ended; this is its terminal event
    Finished(TaskEvent<V>),
}

/// Result of [`TaskPool::join`].
pub(crate) struct Joined<V> {
    pub slot: TaskSlot,
    /// The task is new and must be started by the caller
    pub created: bool,
    pub attach: Attach<V>,
}

/// Outcome of removing a subscription.
pub(crate) enum Detach {
    /// Unknown slot or key
    Missing,
    /// Other subscribers remain
    Remaining { priority: Option<Priority> },
    /// That was the last subscriber; the task was cancelled and removed
    Disposed {
        dependency: Option<(TaskRef, SubscriptionKey)>,
    },
}

/// A task that reached a terminal state through [`TaskPool::emit`].
pub(crate) struct Finished {
    pub outcome: TaskOutcome,
    pub dependency: Option<(TaskRef, SubscriptionKey)>,
}

pub(crate) struct Emitted<V: TaskValue> {
    pub deliveries: Vec<(V::Subscriber, TaskEvent<V>)>,
    pub finished: Option<Finished>,
}

struct Entry<K, V: TaskValue, X> {
    key: Option<K>,
    task: AsyncTask<V, X>,
}

pub(crate) struct TaskPool<K, V: TaskValue, X> {
    layer: Layer,
    coalescing: bool,
    default_priority: Priority,
    keys: HashMap<K, TaskSlot>,
    tasks: HashMap<TaskSlot, Entry<K, V, X>>,
    retained: VecDeque<(TaskSlot, TaskEvent<V>)>,
    retained_capacity: usize,
    next_slot: TaskSlot,
    root: CancellationToken,
    stats: LayerStats,
}

impl<K, V, X> TaskPool<K, V, X>
where
    K: Hash + Eq + Clone,
    V: TaskValue,
{
    pub fn new(
        layer: Layer,
        coalescing: bool,
        default_priority: Priority,
        retained_capacity: usize,
        root: CancellationToken,
    ) -> Self {
        Self {
            layer,
            coalescing,
            default_priority,
            keys: HashMap::new(),
            tasks: HashMap::new(),
            retained: VecDeque::new(),
            retained_capacity,
            next_slot: 0,
            root,
            stats: LayerStats::default(),
        }
    }

    /// Returns the live task for `key`, creating it if needed.
    ///
    /// The second value is true when the task was just created and must be
    /// started by the caller.
    pub fn get_or_create(&mut self, key: K, ext: impl FnOnce() -> X) -> (TaskSlot, bool) {
        if self.coalescing {
            if let Some(&slot) = self.keys.get(&key) {
                self.stats.coalesced += 1;
                return (slot, false);
            }
        }

        let slot = self.next_slot;
        self.next_slot += 1;

        let task = AsyncTask::new(self.default_priority, self.root.child_token(), ext());
        let key = if self.coalescing {
            self.keys.insert(key.clone(), slot);
            Some(key)
        } else {
            None
        };
        self.tasks.insert(slot, Entry { key, task });
        self.stats.created += 1;
        (slot, true)
    }

    pub fn subscribe(
        &mut self,
        slot: TaskSlot,
        subscriber: V::Subscriber,
        priority: Priority,
    ) -> Attach<V> {
        if let Some(entry) = self.tasks.get_mut(&slot) {
            let subscribed = entry.task.subscribe(subscriber, priority);
            return Attach::Attached {
                key: subscribed.key,
                catch_up: subscribed.catch_up,
                priority: subscribed.priority,
            };
        }

        let outcome = self
            .retained
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, event)| event.clone())
            .unwrap_or(TaskEvent::Cancelled);
        Attach::Finished(outcome)
    }

    /// Finds or creates the task for `key` and subscribes to it.
    pub fn join(
        &mut self,
        key: K,
        subscriber: V::Subscriber,
        priority: Priority,
        ext: impl FnOnce() -> X,
    ) -> Joined<V> {
        let (slot, created) = self.get_or_create(key, ext);
        let attach = self.subscribe(slot, subscriber, priority);
        Joined {
            slot,
            created,
            attach,
        }
    }

    pub fn unsubscribe(&mut self, slot: TaskSlot, key: SubscriptionKey) -> Detach {
        let Some(entry) = self.tasks.get_mut(&slot) else {
            return Detach::Missing;
        };
        let Some(unsubscribed) = entry.task.unsubscribe(key) else {
            return Detach::Missing;
        };
        if unsubscribed.remaining > 0 {
            return Detach::Remaining {
                priority: unsubscribed.priority,
            };
        }

        let dependency = self.remove(slot).and_then(|task| {
            task.token.cancel();
            task.dependency
        });
        self.stats.cancelled += 1;
        trace!(layer = %self.layer, slot, "Task disposed, no subscribers left");
        Detach::Disposed { dependency }
    }

    pub fn set_priority(
        &mut self,
        slot: TaskSlot,
        key: SubscriptionKey,
        priority: Priority,
    ) -> Option<Priority> {
        self.tasks.get_mut(&slot)?.task.set_priority(key, priority)
    }

    /// Emits an event from the task in `slot`.
    ///
    /// A terminal event removes the task from the pool and remembers the
    /// event for late subscribers.
    pub fn emit(&mut self, slot: TaskSlot, event: TaskEvent<V>) -> Emitted<V> {
        let Some(entry) = self.tasks.get_mut(&slot) else {
            return Emitted {
                deliveries: Vec::new(),
                finished: None,
            };
        };

        let terminal = if event.is_terminal() {
            Some(event.clone())
        } else {
            None
        };
        let deliveries = entry.task.emit(event);

        let finished = terminal.and_then(|event| {
            let outcome = match &event {
                TaskEvent::Value { .. } => TaskOutcome::Succeeded,
                TaskEvent::Error(_) => TaskOutcome::Failed,
                _ => TaskOutcome::Cancelled,
            };
            match outcome {
                TaskOutcome::Succeeded => self.stats.succeeded += 1,
                TaskOutcome::Failed => self.stats.failed += 1,
                TaskOutcome::Cancelled => self.stats.cancelled += 1,
            }

            trace!(layer = %self.layer, slot, outcome = ?outcome, "Task finished");
            self.retain(slot, event);
            let task = self.remove(slot)?;
            task.token.cancel();
            Some(Finished {
                outcome,
                dependency: task.dependency,
            })
        });

        Emitted {
            deliveries,
            finished,
        }
    }

    pub fn get(&self, slot: TaskSlot) -> Option<&AsyncTask<V, X>> {
        self.tasks.get(&slot).map(|e| &e.task)
    }

    pub fn get_mut(&mut self, slot: TaskSlot) -> Option<&mut AsyncTask<V, X>> {
        self.tasks.get_mut(&slot).map(|e| &mut e.task)
    }

    pub fn contains(&self, slot: TaskSlot) -> bool {
        self.tasks.contains_key(&slot)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> LayerStats {
        LayerStats {
            live: self.tasks.len(),
            ..self.stats
        }
    }

    /// Cancels every live task. Used at shutdown.
    pub fn cancel_all(&mut self) {
        for (_, entry) in self.tasks.drain() {
            entry.task.token.cancel();
            self.stats.cancelled += 1;
        }
        self.keys.clear();
    }

    fn remove(&mut self, slot: TaskSlot) -> Option<AsyncTask<V, X>> {
        let entry = self.tasks.remove(&slot)?;
        if let Some(key) = entry.key {
            if self.keys.get(&key) == Some(&slot) {
                self.keys.remove(&key);
            }
        }
        Some(entry.task)
    }

    fn retain(&mut self, slot: TaskSlot, event: TaskEvent<V>) {
        if self.retained_capacity == 0 {
            return;
        }
        while self.retained.len() >= self.retained_capacity {
            self.retained.pop_front();
        }
        self.retained.push_back((slot, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::event::Progress;

    #[derive(Debug, Clone, PartialEq)]
    struct Val(u32);

    impl TaskValue for Val {
        type Subscriber = u32;
    }

    fn pool(coalescing: bool) -> TaskPool<&'static str, Val, ()> {
        TaskPool::new(
            Layer::FetchOriginalData,
            coalescing,
            Priority::Normal,
            4,
            CancellationToken::new(),
        )
    }

    fn finish(value: u32) -> TaskEvent<Val> {
        TaskEvent::Value {
            value: Val(value),
            is_completed: true,
        }
    }

    #[test]
    fn test_equal_keys_share_a_task() {
        let mut pool = pool(true);
        let (a, created_a) = pool.get_or_create("k", || ());
        let (b, created_b) = pool.get_or_create("k", || ());

        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().coalesced, 1);
    }

    #[test]
    fn test_coalescing_disabled_creates_distinct_tasks() {
        let mut pool = pool(false);
        let (a, _) = pool.get_or_create("k", || ());
        let (b, created) = pool.get_or_create("k", || ());

        assert_ne!(a, b);
        assert!(created);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_last_unsubscribe_disposes_and_cancels() {
        let mut pool = pool(true);
        let (slot, _) = pool.get_or_create("k", || ());
        let token = pool.get(slot).unwrap().token.clone();

        let Attach::Attached { key: k1, .. } = pool.subscribe(slot, 1, Priority::Normal) else {
            panic!("expected attach");
        };
        let Attach::Attached { key: k2, .. } = pool.subscribe(slot, 2, Priority::Normal) else {
            panic!("expected attach");
        };

        assert!(matches!(pool.unsubscribe(slot, k1), Detach::Remaining { .. }));
        assert!(!token.is_cancelled());

        assert!(matches!(pool.unsubscribe(slot, k2), Detach::Disposed { .. }));
        assert!(token.is_cancelled());
        assert!(!pool.contains(slot));
        assert!(matches!(pool.unsubscribe(slot, k2), Detach::Missing));

        // Key is free again: the next request starts a new task
        let (fresh, created) = pool.get_or_create("k", || ());
        assert_ne!(fresh, slot);
        assert!(created);
    }

    #[test]
    fn test_terminal_event_evicts_key() {
        let mut pool = pool(true);
        let (slot, _) = pool.get_or_create("k", || ());
        pool.subscribe(slot, 1, Priority::Normal);

        let emitted = pool.emit(slot, finish(5));
        assert_eq!(emitted.deliveries.len(), 1);
        let finished = emitted.finished.unwrap();
        assert_eq!(finished.outcome, TaskOutcome::Succeeded);

        let (next, created) = pool.get_or_create("k", || ());
        assert_ne!(next, slot);
        assert!(created);
        assert_eq!(pool.stats().succeeded, 1);
    }

    #[test]
    fn test_subscribe_to_finished_slot_replays_outcome() {
        let mut pool = pool(true);
        let (slot, _) = pool.get_or_create("k", || ());
        pool.subscribe(slot, 1, Priority::Normal);
        pool.emit(slot, TaskEvent::Error(PipelineError::PipelineInvalidated));

        match pool.subscribe(slot, 2, Priority::Normal) {
            Attach::Finished(TaskEvent::Error(PipelineError::PipelineInvalidated)) => {}
            _ => panic!("expected replayed failure"),
        }
    }

    #[test]
    fn test_subscribe_to_unknown_slot_is_cancelled() {
        let mut pool = pool(true);
        assert!(matches!(
            pool.subscribe(42, 1, Priority::Normal),
            Attach::Finished(TaskEvent::Cancelled)
        ));
    }

    #[test]
    fn test_non_terminal_emit_keeps_task() {
        let mut pool = pool(true);
        let (slot, _) = pool.get_or_create("k", || ());
        pool.subscribe(slot, 1, Priority::Normal);

        let emitted = pool.emit(slot, TaskEvent::Progress(Progress::new(1, None)));
        assert_eq!(emitted.deliveries.len(), 1);
        assert!(emitted.finished.is_none());
        assert!(pool.contains(slot));
    }

    #[test]
    fn test_cancel_all_cancels_tokens() {
        let mut pool = pool(true);
        let (slot, _) = pool.get_or_create("k", || ());
        let token = pool.get(slot).unwrap().token.clone();

        pool.cancel_all();
        assert!(token.is_cancelled());
        assert_eq!(pool.len(), 0);
    }
}
