use std::thread;
use std::time::Duration;

use taskweave::{ResultHandle, TaskPool};
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = TaskPool::new(2, "basic_pool").expect("Failed to start pool");

  let mut handles: Vec<ResultHandle<String>> = Vec::new();
  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match pool.submit(move || my_task_fn(i, sleep_duration)) {
      Ok(handle) => {
        info!("Submitted task {} with handle id {}", i, handle.id());
        handles.push(handle);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!("All tasks submitted. Waiting for results...");
  for handle in handles {
    match handle.get() {
      Ok(result) => info!("Result for task {}: {}", handle.id(), result),
      Err(e) => info!("Error for task {}: {}", handle.id(), e),
    }
  }

  pool.shutdown();
  info!("--- Basic Usage Example End ---");
}
