use crate::error::{ExecutionFailure, PoolError, TaskError, TaskPanicked, WaitError};
use crate::task::{next_task_id, Runnable, TaskKind, WorkItem};
use crate::task_queue::TaskQueue;

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_intrusive::sync::ManualResetEvent;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

/// Terminal state of a handle.
pub(crate) enum Outcome<R> {
  Completed(R),
  Failed(TaskError),
}

/// Builds the work item of a continuation from its parent's outcome. Called
/// with the parent's state locked.
type Continuation<R> = Box<dyn FnOnce(&Outcome<R>) -> WorkItem + Send + 'static>;

struct HandleState<R> {
  outcome: Option<Outcome<R>>,
  continuations: Vec<Continuation<R>>,
}

/// State shared between a `ResultHandle`, its clones, and the work item that
/// resolves it.
pub(crate) struct Slot<R> {
  task_id: u64,
  kind: TaskKind,
  pool_name: Arc<String>,
  queue: Arc<TaskQueue>,
  state: Mutex<HandleState<R>>,
  ready: Condvar,
  resolved: ManualResetEvent,
}

impl<R: Clone + Send + 'static> Slot<R> {
  pub(crate) fn new(task_id: u64, kind: TaskKind, pool_name: Arc<String>, queue: Arc<TaskQueue>) -> Self {
    Self {
      task_id,
      kind,
      pool_name,
      queue,
      state: Mutex::new(HandleState {
        outcome: None,
        continuations: Vec::new(),
      }),
      ready: Condvar::new(),
      resolved: ManualResetEvent::new(false),
    }
  }

  /// Stores the terminal outcome, wakes every waiter and schedules every
  /// registered continuation.
  ///
  /// # Panics
  /// If the slot was already resolved.
  fn resolve(&self, outcome: Outcome<R>) {
    let pending_items = {
      let mut state = self.state.lock();
      if state.outcome.is_some() {
        drop(state);
        panic!("result handle for task {} resolved twice", self.task_id);
      }
      let continuations = std::mem::take(&mut state.continuations);
      let outcome: &Outcome<R> = state.outcome.insert(outcome);
      let items: Vec<WorkItem> = continuations.into_iter().map(|continuation| continuation(outcome)).collect();
      // Set under the lock so no reader can see the value before the event.
      self.resolved.set();
      items
    };
    self.ready.notify_all();

    if !pending_items.is_empty() {
      debug!(
        pool_name = %*self.pool_name,
        task_id = self.task_id,
        count = pending_items.len(),
        "Scheduling continuations of resolved task."
      );
    }
    for item in pending_items {
      schedule(&self.queue, &self.pool_name, item);
    }
  }

  /// Registers a continuation, or builds its work item right away if the slot
  /// is already resolved.
  fn register(&self, continuation: Continuation<R>) -> Option<WorkItem> {
    let mut state = self.state.lock();
    match state.outcome {
      Some(ref outcome) => Some(continuation(outcome)),
      None => {
        state.continuations.push(continuation);
        None
      }
    }
  }

  fn read(&self, state: &MutexGuard<'_, HandleState<R>>) -> Result<R, ExecutionFailure> {
    match state.outcome {
      Some(Outcome::Completed(ref value)) => Ok(value.clone()),
      Some(Outcome::Failed(ref cause)) => Err(ExecutionFailure::new(self.task_id, cause.clone())),
      None => panic!("result handle for task {} read before it was resolved", self.task_id),
    }
  }
}

fn schedule(queue: &TaskQueue, pool_name: &str, item: WorkItem) {
  if let Err((reason, item)) = queue.push(item) {
    warn!(
      pool_name = %pool_name,
      task_id = item.task_id,
      kind = ?item.kind,
      "Continuation could not be scheduled, failing its handle: {}",
      reason
    );
    item.reject(reason);
  }
}

/// A computation bound to the slot it resolves.
pub(crate) struct TaskJob<R, F> {
  slot: Arc<Slot<R>>,
  computation: F,
}

impl<R, F> TaskJob<R, F>
where
  R: Clone + Send + 'static,
  F: FnOnce() -> Result<R, TaskError> + Send + 'static,
{
  pub(crate) fn new(slot: Arc<Slot<R>>, computation: F) -> Self {
    Self { slot, computation }
  }
}

impl<R, F> Runnable for TaskJob<R, F>
where
  R: Clone + Send + 'static,
  F: FnOnce() -> Result<R, TaskError> + Send + 'static,
{
  fn run(self: Box<Self>) {
    let TaskJob { slot, computation } = *self;
    let outcome = match panic::catch_unwind(AssertUnwindSafe(computation)) {
      Ok(Ok(value)) => {
        trace!(pool_name = %*slot.pool_name, task_id = slot.task_id, "Task executed successfully.");
        Outcome::Completed(value)
      }
      Ok(Err(cause)) => {
        debug!(pool_name = %*slot.pool_name, task_id = slot.task_id, "Task returned an error: {}", cause);
        Outcome::Failed(cause)
      }
      Err(payload) => {
        let panicked = TaskPanicked::from_payload(&*payload);
        error!(
          pool_name = %*slot.pool_name,
          task_id = slot.task_id,
          "Task panicked during execution: {}",
          panicked.message
        );
        Outcome::Failed(Arc::new(panicked))
      }
    };
    slot.resolve(outcome);
  }

  fn reject(self: Box<Self>, reason: PoolError) {
    self.slot.resolve(Outcome::Failed(Arc::new(reason)));
  }
}

/// Copies a parent's outcome for one continuation. `R::clone` is user code
/// running on whichever thread resolved the parent, so a panic in it is
/// caught here and only fails the continuation.
fn copy_outcome<R: Clone>(outcome: &Outcome<R>, child_id: u64) -> Result<R, TaskError> {
  match outcome {
    Outcome::Completed(value) => panic::catch_unwind(AssertUnwindSafe(|| value.clone())).map_err(|payload| {
      let panicked = TaskPanicked::from_payload(&*payload);
      error!(task_id = child_id, "Cloning the parent's value panicked: {}", panicked.message);
      Arc::new(panicked) as TaskError
    }),
    Outcome::Failed(cause) => Err(cause.clone()),
  }
}

pub(crate) fn into_task_error<E>(err: E) -> TaskError
where
  E: Into<Box<dyn Error + Send + Sync + 'static>>,
{
  let boxed: Box<dyn Error + Send + Sync + 'static> = err.into();
  Arc::from(boxed)
}

/// A handle to the eventual result of a computation submitted to a `TaskPool`.
///
/// The handle is single-assignment: it resolves exactly once, either with the
/// computation's value or with its error. Clones share the same result.
pub struct ResultHandle<R> {
  slot: Arc<Slot<R>>,
}

impl<R> Clone for ResultHandle<R> {
  fn clone(&self) -> Self {
    Self { slot: self.slot.clone() }
  }
}

impl<R: Clone + Send + 'static> fmt::Debug for ResultHandle<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultHandle")
      .field("task_id", &self.slot.task_id)
      .field("ready", &self.is_ready())
      .finish()
  }
}

impl<R: Clone + Send + 'static> ResultHandle<R> {
  pub(crate) fn from_slot(slot: Arc<Slot<R>>) -> Self {
    Self { slot }
  }

  /// Returns the unique ID of the task behind this handle.
  pub fn id(&self) -> u64 {
    self.slot.task_id
  }

  /// Whether this task was submitted directly or registered as a continuation.
  pub fn kind(&self) -> TaskKind {
    self.slot.kind
  }

  /// Returns `true` once the task has completed or failed. Never blocks on
  /// the task itself.
  pub fn is_ready(&self) -> bool {
    self.slot.state.lock().outcome.is_some()
  }

  /// Blocks the calling thread until the task resolves and returns its value.
  ///
  /// # Errors
  /// Returns an `ExecutionFailure` carrying the original error as its cause if
  /// the computation failed or panicked.
  pub fn get(&self) -> Result<R, ExecutionFailure> {
    let mut state = self.slot.state.lock();
    while state.outcome.is_none() {
      self.slot.ready.wait(&mut state);
    }
    self.slot.read(&state)
  }

  /// Like [`get`](Self::get), but gives up after `timeout`. A timeout too
  /// large to express as a deadline waits without limit.
  pub fn get_timeout(&self, timeout: Duration) -> Result<R, WaitError> {
    let Some(deadline) = Instant::now().checked_add(timeout) else {
      return Ok(self.get()?);
    };
    let mut state = self.slot.state.lock();
    while state.outcome.is_none() {
      if self.slot.ready.wait_until(&mut state, deadline).timed_out() && state.outcome.is_none() {
        return Err(WaitError::Timeout(timeout));
      }
    }
    Ok(self.slot.read(&state)?)
  }

  /// Returns the outcome if the task has already resolved, without blocking.
  pub fn try_get(&self) -> Option<Result<R, ExecutionFailure>> {
    let state = self.slot.state.lock();
    if state.outcome.is_none() {
      return None;
    }
    Some(self.slot.read(&state))
  }

  /// Waits for the task to resolve without blocking the current thread.
  pub async fn wait(&self) -> Result<R, ExecutionFailure> {
    self.slot.resolved.wait().await;
    let state = self.slot.state.lock();
    self.slot.read(&state)
  }

  /// Schedules `transform` to run on the pool with this task's value once it
  /// is available, and returns a handle to the transformed result.
  ///
  /// The transform never runs on the calling thread. If this task fails, the
  /// returned handle fails with the same cause and `transform` is not called.
  pub fn then_apply<R2, F>(&self, transform: F) -> ResultHandle<R2>
  where
    R2: Clone + Send + 'static,
    F: FnOnce(R) -> R2 + Send + 'static,
  {
    self.then_try_apply(move |value| Ok::<R2, std::convert::Infallible>(transform(value)))
  }

  /// Fallible variant of [`then_apply`](Self::then_apply).
  pub fn then_try_apply<R2, E, F>(&self, transform: F) -> ResultHandle<R2>
  where
    R2: Clone + Send + 'static,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
    F: FnOnce(R) -> Result<R2, E> + Send + 'static,
  {
    let parent_id = self.slot.task_id;
    let child = Arc::new(Slot::new(
      next_task_id(),
      TaskKind::Continuation { parent_id },
      self.slot.pool_name.clone(),
      self.slot.queue.clone(),
    ));
    let child_for_job = child.clone();

    let continuation: Continuation<R> = Box::new(move |outcome: &Outcome<R>| {
      let parent_value = copy_outcome(outcome, child_for_job.task_id);
      let task_id = child_for_job.task_id;
      let job = TaskJob::new(child_for_job, move || match parent_value {
        Ok(value) => transform(value).map_err(into_task_error),
        Err(cause) => Err(cause),
      });
      WorkItem::new(task_id, TaskKind::Continuation { parent_id }, Box::new(job))
    });

    trace!(
      pool_name = %*self.slot.pool_name,
      task_id = child.task_id,
      parent_id,
      "Registering continuation."
    );
    if let Some(item) = self.slot.register(continuation) {
      schedule(&self.slot.queue, &self.slot.pool_name, item);
    }
    ResultHandle { slot: child }
  }
}
