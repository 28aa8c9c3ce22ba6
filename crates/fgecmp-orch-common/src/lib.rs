//! Orchestration framework for the fgecmpd controller.
//!
//! - [`Orch`]: trait implemented by every orchestration module
//! - [`Consumer`]: per-table queue of config deltas with SET/DEL dedup
//! - [`SyncMap`]: map that never creates entries on lookup
//! - [`TaskStatus`] / [`TaskError`]: per-entry processing outcome
//! - [`WarmRestartTable`]: typed state-database map used for checkpoints
//!
//! The runtime model is a single event-pump task: the daemon polls each
//! registered Orch in priority order and calls `do_task()` when it has
//! pending work. Handlers never run concurrently, so Orch state needs no
//! internal locking. An entry whose dependencies are not met yet is pushed
//! back with [`Consumer::retry`] and picked up on a later pass.

mod consumer;
mod orch;
mod state_table;
mod sync_map;
mod task;

pub use consumer::{Consumer, ConsumerConfig, FieldValue, KeyOpFieldsValues, Operation};
pub use orch::{Orch, OrchContext};
pub use state_table::{InMemoryWarmRestartTable, WarmRestartTable};
pub use sync_map::{HasRefCount, SyncMap, SyncMapError};
pub use task::{TaskError, TaskResult, TaskStatus};
