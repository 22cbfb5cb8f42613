use crate::error::PoolError;
use crate::handle::{into_task_error, ResultHandle, Slot, TaskJob};
use crate::task::{next_task_id, TaskKind, WorkItem};
use crate::task_queue::TaskQueue;

use std::convert::Infallible;
use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn};

/// Construction parameters for a `TaskPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Number of worker threads. Must be greater than zero.
  pub worker_count: usize,
  /// Used in log records and as the prefix of worker thread names.
  pub name: String,
  /// Stack size of each worker thread; the platform default when `None`.
  pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
      name: "task_pool".to_string(),
      stack_size: None,
    }
  }
}

struct PoolInner {
  pool_name: Arc<String>,
  queue: Arc<TaskQueue>,
  active_task_info: DashMap<u64, TaskKind>,
  shutdown_token: CancellationToken,
}

/// A fixed set of worker threads draining one shared FIFO queue.
///
/// Every submission returns a [`ResultHandle`]; continuations registered with
/// [`ResultHandle::then_apply`] are scheduled onto the same workers, so no
/// worker ever blocks waiting on another task.
pub struct TaskPool {
  inner: Arc<PoolInner>,
  worker_ids: Vec<ThreadId>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for TaskPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskPool")
      .field("name", &*self.inner.pool_name)
      .field("worker_count", &self.worker_ids.len())
      .field("queued", &self.inner.queue.len())
      .field("active", &self.inner.active_task_info.len())
      .field("shutdown", &self.inner.shutdown_token.is_cancelled())
      .finish()
  }
}

impl TaskPool {
  /// Starts a pool with `worker_count` workers.
  ///
  /// # Errors
  /// `PoolError::InvalidWorkerCount` if `worker_count` is zero, and
  /// `PoolError::WorkerSpawnFailed` if the OS refuses to start a thread.
  pub fn new(worker_count: usize, pool_name: &str) -> Result<Self, PoolError> {
    Self::with_config(PoolConfig {
      worker_count,
      name: pool_name.to_string(),
      stack_size: None,
    })
  }

  pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
    if config.worker_count == 0 {
      return Err(PoolError::InvalidWorkerCount);
    }

    let inner = Arc::new(PoolInner {
      pool_name: Arc::new(config.name),
      queue: Arc::new(TaskQueue::new()),
      active_task_info: DashMap::new(),
      shutdown_token: CancellationToken::new(),
    });

    let mut workers = Vec::with_capacity(config.worker_count);
    for worker_index in 0..config.worker_count {
      let mut builder = thread::Builder::new().name(format!("{}-worker-{}", inner.pool_name, worker_index));
      if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
      }

      let worker_inner = inner.clone();
      match builder.spawn(move || Self::run_worker_loop(worker_inner, worker_index)) {
        Ok(handle) => workers.push(handle),
        Err(spawn_error) => {
          error!(
            pool_name = %*inner.pool_name,
            worker = worker_index,
            "Failed to spawn worker thread: {}",
            spawn_error
          );
          inner.shutdown_token.cancel();
          inner.queue.close();
          for handle in workers {
            let _ = handle.join();
          }
          return Err(PoolError::WorkerSpawnFailed(spawn_error.to_string()));
        }
      }
    }

    info!(pool_name = %*inner.pool_name, workers = workers.len(), "Task pool started.");
    Ok(Self {
      inner,
      worker_ids: workers.iter().map(|handle| handle.thread().id()).collect(),
      workers: Mutex::new(workers),
    })
  }

  pub fn name(&self) -> &str {
    &self.inner.pool_name
  }

  pub fn worker_count(&self) -> usize {
    self.worker_ids.len()
  }

  /// Returns the number of tasks currently being executed by a worker.
  pub fn active_task_count(&self) -> usize {
    self.inner.active_task_info.len()
  }

  /// Returns the number of ready tasks waiting for a free worker.
  pub fn queued_task_count(&self) -> usize {
    self.inner.queue.len()
  }

  pub fn is_shutdown(&self) -> bool {
    self.inner.shutdown_token.is_cancelled()
  }

  /// A token that is cancelled as soon as shutdown begins. Long-running
  /// computations can poll it to finish early.
  pub fn shutdown_token(&self) -> CancellationToken {
    self.inner.shutdown_token.clone()
  }

  /// Queues `computation` and returns a handle to its result. Never blocks.
  ///
  /// A panic inside `computation` fails the handle with a
  /// [`TaskPanicked`](crate::TaskPanicked) cause; the worker survives.
  ///
  /// # Errors
  /// `PoolError::PoolShuttingDown` once shutdown has begun.
  pub fn submit<R, F>(&self, computation: F) -> Result<ResultHandle<R>, PoolError>
  where
    R: Clone + Send + 'static,
    F: FnOnce() -> R + Send + 'static,
  {
    self.submit_fallible(move || Ok::<R, Infallible>(computation()))
  }

  /// Queues a computation that may fail. An `Err` fails the returned handle
  /// with that error as the cause.
  pub fn submit_fallible<R, E, F>(&self, computation: F) -> Result<ResultHandle<R>, PoolError>
  where
    R: Clone + Send + 'static,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
    F: FnOnce() -> Result<R, E> + Send + 'static,
  {
    if self.inner.shutdown_token.is_cancelled() {
      warn!(pool_name = %*self.inner.pool_name, "Submit: Attempted to submit task to a pool that is shutting down or closed.");
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = next_task_id();
    let slot = Arc::new(Slot::new(
      task_id,
      TaskKind::Root,
      self.inner.pool_name.clone(),
      self.inner.queue.clone(),
    ));
    let job = TaskJob::new(slot.clone(), move || computation().map_err(into_task_error));

    debug!(pool_name = %*self.inner.pool_name, %task_id, "Submitting task to queue.");
    match self.inner.queue.push(WorkItem::new(task_id, TaskKind::Root, Box::new(job))) {
      Ok(()) => Ok(ResultHandle::from_slot(slot)),
      Err((reason, _rejected)) => {
        warn!(pool_name = %*self.inner.pool_name, %task_id, "Submit: Task queue closed before the task was queued.");
        Err(reason)
      }
    }
  }

  /// Stops the pool: every worker finishes the item it is running and exits.
  ///
  /// Items still queued are abandoned and their handles never resolve. Blocks
  /// until all workers have exited, except when called from one of this
  /// pool's own workers, in which case it only signals shutdown. Idempotent.
  pub fn shutdown(&self) {
    let already_initiating_shutdown = self.inner.shutdown_token.is_cancelled();

    if !already_initiating_shutdown {
      info!(pool_name = %*self.inner.pool_name, "Initiating explicit pool shutdown.");
      self.signal_shutdown();
    } else {
      info!(pool_name = %*self.inner.pool_name, "Shutdown already in progress or initiated by another call.");
    }

    if self.worker_ids.contains(&thread::current().id()) {
      debug!(pool_name = %*self.inner.pool_name, "Shutdown called from a pool worker; not joining workers.");
      return;
    }

    // Held across the joins so that a concurrent caller also waits for them.
    let mut workers = self.workers.lock();
    if !workers.is_empty() {
      info!(pool_name = %*self.inner.pool_name, "Waiting for {} workers to join.", workers.len());
    }
    for handle in workers.drain(..) {
      let worker_name = handle.thread().name().unwrap_or("<unnamed>").to_string();
      match handle.join() {
        Ok(()) => trace!(pool_name = %*self.inner.pool_name, worker = %worker_name, "Worker joined."),
        Err(_) => error!(pool_name = %*self.inner.pool_name, worker = %worker_name, "Worker thread panicked."),
      }
    }

    if !already_initiating_shutdown {
      info!(pool_name = %*self.inner.pool_name, "Pool shutdown process completed by this call.");
    }
  }

  fn signal_shutdown(&self) {
    self.inner.shutdown_token.cancel();
    if let Some(abandoned) = self.inner.queue.close() {
      if abandoned > 0 {
        warn!(pool_name = %*self.inner.pool_name, abandoned, "Queued tasks abandoned by shutdown.");
      }
    }
  }

  fn run_worker_loop(inner: Arc<PoolInner>, worker_index: usize) {
    let _span = info_span!("task_pool_worker", pool_name = %*inner.pool_name, worker = worker_index).entered();
    debug!("Worker loop started.");

    loop {
      if inner.shutdown_token.is_cancelled() {
        debug!("Shutdown signal received. Worker loop terminating.");
        break;
      }

      let Some(item) = inner.queue.pop_blocking() else {
        debug!("Task queue closed. Worker loop terminating.");
        break;
      };

      let task_id = item.task_id;
      trace!(%task_id, kind = ?item.kind, "Dequeued task.");
      inner.active_task_info.insert(task_id, item.kind);
      item.run();
      inner.active_task_info.remove(&task_id);
    }

    debug!("Worker loop stopped.");
  }
}

impl Drop for TaskPool {
  fn drop(&mut self) {
    // The workers are not joined here; they exit on their own once the queue
    // is closed.
    if !self.inner.shutdown_token.is_cancelled() {
      info!(
        pool_name = %*self.inner.pool_name,
        "TaskPool dropped without shutdown. Signaling workers to stop."
      );
      self.signal_shutdown();
    } else {
      trace!(pool_name = %*self.inner.pool_name, "Drop: Shutdown already in progress or completed.");
    }
  }
}
