use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// The shared, type-erased cause of a failed task.
pub type TaskError = Arc<dyn Error + Send + Sync + 'static>;

/// Errors raised by the `TaskPool` itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("A task pool needs at least one worker")]
  InvalidWorkerCount,

  #[error("Failed to spawn pool worker thread: {0}")]
  WorkerSpawnFailed(String),

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,
}

/// The cause recorded on a handle whose computation panicked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task panicked: {message}")]
pub struct TaskPanicked {
  pub message: String,
}

impl TaskPanicked {
  pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "<non-string panic payload>".to_string()
    };
    Self { message }
  }
}

/// Returned by `ResultHandle::get` when the underlying computation failed.
///
/// The original error is never handed back directly; it is available through
/// [`ExecutionFailure::cause`] or `Error::source`, and can be downcast from there.
#[derive(Clone)]
pub struct ExecutionFailure {
  task_id: u64,
  cause: TaskError,
}

impl ExecutionFailure {
  pub(crate) fn new(task_id: u64, cause: TaskError) -> Self {
    Self { task_id, cause }
  }

  /// The id of the task whose handle failed.
  pub fn task_id(&self) -> u64 {
    self.task_id
  }

  /// The error the computation failed with.
  pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
    &*self.cause
  }

  /// Attempts to view the cause as a concrete error type.
  pub fn downcast_cause_ref<E: Error + 'static>(&self) -> Option<&E> {
    self.cause.downcast_ref::<E>()
  }
}

impl fmt::Debug for ExecutionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionFailure")
      .field("task_id", &self.task_id)
      .field("cause", &self.cause)
      .finish()
  }
}

impl fmt::Display for ExecutionFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Task (id: {}) failed: {}", self.task_id, self.cause)
  }
}

impl Error for ExecutionFailure {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    Some(&*self.cause)
  }
}

/// Errors from a bounded wait on a `ResultHandle`.
#[derive(Error, Debug, Clone)]
pub enum WaitError {
  #[error("Task result was not ready after {0:?}")]
  Timeout(Duration),

  #[error(transparent)]
  Execution(#[from] ExecutionFailure),
}
