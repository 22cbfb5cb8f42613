//! Concurrency primitives: a fixed-size thread pool whose result handles can
//! be chained, and a lock-free concurrent list.

mod error;
mod handle;
mod lockfree_set;
mod manager;
mod task;
mod task_queue;

pub use error::{ExecutionFailure, PoolError, TaskError, TaskPanicked, WaitError};
pub use handle::ResultHandle;
pub use lockfree_set::{Iter, LockFreeSet};
pub use manager::{PoolConfig, TaskPool};
pub use task::TaskKind;
