use std::thread;
use std::time::Duration;

use taskweave::{ResultHandle, TaskPool};
use tracing::info;

fn work_task_fn(id: usize, duration_ms: u64) -> String {
  info!("Task {} starting (will run for {}ms)", id, duration_ms);
  thread::sleep(Duration::from_millis(duration_ms));
  let result = format!("Task {} finished after {}ms", id, duration_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Graceful Shutdown Example ---");

  let pool = TaskPool::new(2, "graceful_shutdown_pool").expect("Failed to start pool");

  let handles: Vec<ResultHandle<String>> = (0..4)
    .map(|i| pool.submit(move || work_task_fn(i, 500)).expect("Failed to submit task"))
    .collect();

  // Give the first two tasks time to start; the other two stay queued.
  thread::sleep(Duration::from_millis(100));
  info!(
    "Before shutdown: {} active, {} queued",
    pool.active_task_count(),
    pool.queued_task_count()
  );

  pool.shutdown();
  info!("Shutdown returned; every worker has stopped.");

  for handle in &handles {
    match handle.try_get() {
      Some(Ok(result)) => info!("Task {} resolved: {}", handle.id(), result),
      Some(Err(e)) => info!("Task {} failed: {}", handle.id(), e),
      None => info!("Task {} was still queued and was abandoned.", handle.id()),
    }
  }

  match pool.submit(|| "too late".to_string()) {
    Ok(_) => info!("UNEXPECTED: pool accepted work after shutdown"),
    Err(e) => info!("Submission after shutdown rejected: {}", e),
  }

  info!("--- Graceful Shutdown Example End ---");
}
