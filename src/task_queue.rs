use crate::error::PoolError;
use crate::task::WorkItem;

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

struct QueueState {
  items: VecDeque<WorkItem>,
  closed: bool,
}

/// The pool's shared FIFO of ready work items.
///
/// Producers are submitters and whichever thread resolves a parent handle;
/// consumers are the pool workers, which sleep on the condvar while the
/// queue is empty. Closing the queue is irreversible.
pub(crate) struct TaskQueue {
  state: Mutex<QueueState>,
  available: Condvar,
}

impl fmt::Debug for TaskQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("TaskQueue")
      .field("len", &state.items.len())
      .field("closed", &state.closed)
      .finish()
  }
}

impl TaskQueue {
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(QueueState {
        items: VecDeque::new(),
        closed: false,
      }),
      available: Condvar::new(),
    }
  }

  /// Appends an item and wakes one idle worker.
  ///
  /// Hands the item back inside the error if the queue has been closed so the
  /// caller can decide what to do with its handle.
  pub(crate) fn push(&self, item: WorkItem) -> Result<(), (PoolError, WorkItem)> {
    {
      let mut state = self.state.lock();
      if state.closed {
        return Err((PoolError::PoolShuttingDown, item));
      }
      state.items.push_back(item);
    }
    self.available.notify_one();
    Ok(())
  }

  /// Takes the oldest item, suspending while the queue is empty.
  ///
  /// Returns `None` once the queue is closed, even if items remain; those are
  /// abandoned.
  pub(crate) fn pop_blocking(&self) -> Option<WorkItem> {
    let mut state = self.state.lock();
    loop {
      if state.closed {
        return None;
      }
      if let Some(item) = state.items.pop_front() {
        return Some(item);
      }
      self.available.wait(&mut state);
    }
  }

  /// Closes the queue and wakes every waiting worker. Returns the number of
  /// items that were abandoned, or `None` if the queue was already closed.
  pub(crate) fn close(&self) -> Option<usize> {
    let abandoned = {
      let mut state = self.state.lock();
      if state.closed {
        return None;
      }
      state.closed = true;
      std::mem::take(&mut state.items)
    };
    self.available.notify_all();
    // Dropped outside the lock: an abandoned job may own the last reference to
    // arbitrary user state.
    let count = abandoned.len();
    drop(abandoned);
    Some(count)
  }

  #[cfg(test)]
  fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().items.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{Runnable, TaskKind};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  struct Count(Arc<AtomicUsize>);

  impl Runnable for Count {
    fn run(self: Box<Self>) {
      self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn reject(self: Box<Self>, _reason: PoolError) {}
  }

  fn counting_item(id: u64, counter: &Arc<AtomicUsize>) -> WorkItem {
    WorkItem::new(id, TaskKind::Root, Box::new(Count(counter.clone())))
  }

  #[test]
  fn pops_in_fifo_order() {
    let queue = TaskQueue::new();
    let counter = Arc::new(AtomicUsize::new(0));
    for id in 0..3 {
      queue.push(counting_item(id, &counter)).unwrap();
    }
    assert_eq!(queue.len(), 3);
    let ids: Vec<u64> = (0..3).map(|_| queue.pop_blocking().unwrap().task_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
  }

  #[test]
  fn close_abandons_pending_items_and_rejects_pushes() {
    let queue = TaskQueue::new();
    let counter = Arc::new(AtomicUsize::new(0));
    queue.push(counting_item(1, &counter)).unwrap();
    queue.push(counting_item(2, &counter)).unwrap();

    assert_eq!(queue.close(), Some(2));
    assert_eq!(queue.close(), None);
    assert!(queue.is_closed());
    assert!(queue.pop_blocking().is_none());

    let (err, item) = queue.push(counting_item(3, &counter)).unwrap_err();
    assert_eq!(err, PoolError::PoolShuttingDown);
    assert_eq!(item.task_id, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn blocked_consumer_wakes_on_push() {
    let queue = Arc::new(TaskQueue::new());
    let counter = Arc::new(AtomicUsize::new(0));
    let consumer = {
      let queue = queue.clone();
      std::thread::spawn(move || queue.pop_blocking().map(WorkItem::run))
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    queue.push(counting_item(7, &counter)).unwrap();
    assert!(consumer.join().unwrap().is_some());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }
}
