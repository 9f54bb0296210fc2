//! Task-coalescing engine.
//!
//! The engine turns requests into a graph of shared tasks, one pool per
//! layer, and runs it on a single coordinator task:
//!
//! ```text
//!   ImageTask ──► LoadImage ──► FetchOriginalImage ──┐
//!                                                    ├──► FetchOriginalData
//!   DataTask ───► LoadData ──────────────────────────┘
//! ```
//!
//! Requests whose keys match at a layer share that layer's task. Events
//! flow up the graph and fan out to every subscriber; cancelling the last
//! subscriber of a task cancels it and releases its own subscription below.

mod command;
mod coordinator;
mod layers;
mod pool;
mod queue;
mod rate_limiter;
mod task;
mod work;

pub(crate) use command::{Command, CommandSender, Reply};
pub(crate) use coordinator::{Collaborators, Coordinator};
pub use pool::LayerStats;
pub use queue::{QueueKind, QueueStats};
pub use rate_limiter::{DEFAULT_BURST, DEFAULT_RATE};
