use crate::error::PoolError;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) fn next_task_id() -> u64 {
  NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Whether a work item was submitted directly or derived from a parent handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
  Root,
  Continuation { parent_id: u64 },
}

/// Body of a work item. Either path resolves the item's handle exactly once.
pub(crate) trait Runnable: Send + 'static {
  /// Executes the computation on the current (worker) thread.
  fn run(self: Box<Self>);

  /// Resolves the handle as failed without running the computation.
  fn reject(self: Box<Self>, reason: PoolError);
}

/// Internal representation of a unit of work waiting in, or taken from, the queue.
pub(crate) struct WorkItem {
  pub(crate) task_id: u64,
  pub(crate) kind: TaskKind,
  job: Box<dyn Runnable>,
}

impl WorkItem {
  pub(crate) fn new(task_id: u64, kind: TaskKind, job: Box<dyn Runnable>) -> Self {
    Self { task_id, kind, job }
  }

  pub(crate) fn run(self) {
    self.job.run()
  }

  pub(crate) fn reject(self, reason: PoolError) {
    self.job.reject(reason)
  }
}

impl fmt::Debug for WorkItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem")
      .field("task_id", &self.task_id)
      .field("kind", &self.kind)
      .finish_non_exhaustive()
  }
}
