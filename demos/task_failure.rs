use std::io;

use taskweave::{TaskPanicked, TaskPool};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Failure Example ---");

  let pool = TaskPool::new(1, "failure_pool").expect("Failed to start pool");

  let io_task = pool
    .submit_fallible(|| -> Result<String, io::Error> {
      Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
    })
    .expect("Failed to submit failing task");

  let panicking_task = pool
    .submit(|| -> String {
      info!("Panicking Task: About to panic!");
      panic!("This task is designed to panic!");
    })
    .expect("Failed to submit panicking task");

  match io_task.get() {
    Ok(result) => info!("Task {} completed with UNEXPECTED result: {}", io_task.id(), result),
    Err(failure) => match failure.downcast_cause_ref::<io::Error>() {
      Some(cause) => info!("Task {} failed with io error ({:?}): {}", io_task.id(), cause.kind(), cause),
      None => info!("Task {} failed with unexpected cause: {}", io_task.id(), failure),
    },
  }

  match panicking_task.get() {
    Ok(result) => info!("Task {} completed with UNEXPECTED result: {}", panicking_task.id(), result),
    Err(failure) => match failure.downcast_cause_ref::<TaskPanicked>() {
      Some(panicked) => info!("Task {} correctly reported a panic: {}", panicking_task.id(), panicked.message),
      None => info!("Task {} failed with unexpected cause: {}", panicking_task.id(), failure),
    },
  }

  // The worker survived both failures.
  let recovered = pool.submit(|| 3 + 4).expect("Failed to submit follow-up task");
  info!("Follow-up task result: {:?}", recovered.get());

  pool.shutdown();
  info!("--- Task Failure Example End ---");
}
