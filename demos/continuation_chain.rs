use std::time::Duration;

use taskweave::TaskPool;
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Continuation Chain Example ---");

  let pool = TaskPool::new(2, "chain_pool").expect("Failed to start pool");

  let root = pool
    .submit(|| {
      std::thread::sleep(Duration::from_millis(100));
      "17,25,8,50".to_string()
    })
    .expect("Failed to submit root task");

  // Each link runs on the pool once its parent resolves.
  let numbers = root.then_try_apply(|csv| {
    csv
      .split(',')
      .map(str::parse::<u32>)
      .collect::<Result<Vec<u32>, _>>()
  });
  let total = numbers.then_apply(|values| values.iter().sum::<u32>());
  let largest = numbers.then_apply(|values| values.into_iter().max());

  info!("Chain registered; root ready: {}", root.is_ready());
  info!("Total: {:?}", total.get());
  info!("Largest: {:?}", largest.get());

  // A link on an already resolved handle is scheduled immediately.
  let report = total.then_apply(|sum| format!("sum is {}", sum));
  info!("Report: {:?}", report.get());

  pool.shutdown();
  info!("--- Continuation Chain Example End ---");
}
