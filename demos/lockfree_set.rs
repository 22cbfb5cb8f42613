use std::sync::Arc;
use std::thread;

use taskweave::LockFreeSet;
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Lock-Free Set Example ---");

  let peers = Arc::new(LockFreeSet::new());

  let writers: Vec<_> = (0..4)
    .map(|writer| {
      let peers = peers.clone();
      thread::spawn(move || {
        for port in 0..5u16 {
          peers.append(format!("10.0.0.{}:{}", writer, 7000 + port));
        }
        // Every writer drops its own first peer again.
        peers.remove(&format!("10.0.0.{}:7000", writer))
      })
    })
    .collect();

  for writer in writers {
    let removed = writer.join().expect("writer thread panicked");
    info!("Writer removed its first peer: {}", removed);
  }

  info!("Peers known: {}", peers.len());
  info!("Contains 10.0.0.2:7003: {}", peers.contains(&"10.0.0.2:7003".to_string()));
  info!("Contains 10.0.0.2:7000: {}", peers.contains(&"10.0.0.2:7000".to_string()));

  let mut peers = Arc::try_unwrap(peers).expect("writers still hold the set");
  info!("Reclaimed {} removed nodes", peers.purge());
  info!("Remaining peers: {:?}", peers);

  info!("--- Lock-Free Set Example End ---");
}
