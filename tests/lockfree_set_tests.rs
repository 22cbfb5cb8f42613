use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rand::seq::SliceRandom;
use rand::Rng;
use taskweave::{LockFreeSet, TaskPool};

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,taskweave=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[test]
fn test_fresh_set_is_empty() {
  let set: LockFreeSet<u32> = LockFreeSet::new();
  assert!(set.is_empty());
  assert_eq!(set.len(), 0);
  assert!(!set.contains(&1));
  assert!(!set.remove(&1));
}

#[test]
fn test_empty_after_removing_only_element() {
  let set = LockFreeSet::new();
  set.append("only");
  assert!(!set.is_empty());
  assert!(set.remove(&"only"));
  assert!(set.is_empty());
  assert!(!set.contains(&"only"));
  assert!(!set.remove(&"only"));
}

#[test]
fn test_traversal_order_is_reverse_of_append_order() {
  let set = LockFreeSet::new();
  for v in 1..=5 {
    set.append(v);
  }
  let seen: Vec<i32> = set.iter().copied().collect();
  assert_eq!(seen, vec![5, 4, 3, 2, 1]);
  assert_eq!(format!("{:?}", set), "[5, 4, 3, 2, 1]");

  assert!(set.remove(&3));
  assert!(set.remove(&5));
  let seen: Vec<i32> = (&set).into_iter().copied().collect();
  assert_eq!(seen, vec![4, 2, 1]);
}

#[test]
fn test_duplicates_are_independent_occurrences() {
  let set = LockFreeSet::new();
  set.append(7);
  set.append(7);
  set.append(8);
  assert_eq!(set.len(), 3);

  assert!(set.remove(&7));
  assert!(set.contains(&7));
  assert!(set.remove(&7));
  assert!(!set.contains(&7));
  assert!(!set.remove(&7));
  assert!(set.contains(&8));
}

#[test]
fn test_single_thread_operations_match_multiset_model() {
  let set = LockFreeSet::new();
  let mut model: HashMap<u8, usize> = HashMap::new();
  let mut rng = rand::rng();

  for _ in 0..5_000 {
    let value: u8 = rng.random_range(0..12);
    if rng.random_bool(0.55) {
      set.append(value);
      *model.entry(value).or_default() += 1;
    } else {
      let expected = model.get(&value).copied().unwrap_or(0) > 0;
      assert_eq!(set.remove(&value), expected, "remove({}) disagreed with model", value);
      if expected {
        *model.get_mut(&value).unwrap() -= 1;
      }
    }

    for candidate in 0..12u8 {
      let expected = model.get(&candidate).copied().unwrap_or(0) > 0;
      assert_eq!(set.contains(&candidate), expected, "contains({}) disagreed with model", candidate);
    }
  }

  let total: usize = model.values().sum();
  assert_eq!(set.len(), total);
  assert_eq!(set.is_empty(), total == 0);
}

#[test]
fn test_concurrent_appends_lose_no_updates() {
  setup_tracing_for_test();
  const THREADS: usize = 8;
  const PER_THREAD: usize = 2_000;
  let set = LockFreeSet::new();
  let barrier = Barrier::new(THREADS);

  thread::scope(|scope| {
    for t in 0..THREADS {
      let (set, barrier) = (&set, &barrier);
      scope.spawn(move || {
        barrier.wait();
        for i in 0..PER_THREAD {
          set.append(t * PER_THREAD + i);
        }
      });
    }
  });

  assert_eq!(set.len(), THREADS * PER_THREAD);
  for v in 0..THREADS * PER_THREAD {
    assert!(set.contains(&v), "value {} was lost", v);
  }
}

#[test]
fn test_racing_removals_of_one_occurrence_have_one_winner() {
  setup_tracing_for_test();
  const THREADS: usize = 8;

  for round in 0..200u32 {
    let set = LockFreeSet::new();
    // Put the contested value at varying depths.
    for filler in 0..(round % 5) {
      set.append(1_000 + filler);
    }
    set.append(round);
    for filler in 0..(round % 3) {
      set.append(2_000 + filler);
    }

    let winners = AtomicUsize::new(0);
    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
      for _ in 0..THREADS {
        scope.spawn(|| {
          barrier.wait();
          if set.remove(&round) {
            winners.fetch_add(1, Ordering::SeqCst);
          }
        });
      }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1, "round {}", round);
    assert!(!set.contains(&round));
    assert_eq!(set.len(), (round % 5 + round % 3) as usize);
  }
}

#[test]
fn test_heavy_contention_on_one_value_balances() {
  setup_tracing_for_test();
  const THREADS: usize = 16;
  const ROUNDS: usize = 2_000;
  let set = LockFreeSet::new();
  let removed = AtomicUsize::new(0);
  let barrier = Barrier::new(THREADS);

  thread::scope(|scope| {
    for _ in 0..THREADS {
      let (set, removed, barrier) = (&set, &removed, &barrier);
      scope.spawn(move || {
        barrier.wait();
        for _ in 0..ROUNDS {
          set.append(7u8);
          if set.remove(&7) {
            removed.fetch_add(1, Ordering::Relaxed);
          }
        }
      });
    }
  });

  // A removal may miss occurrences appended behind its traversal, but every
  // occurrence is either removed once or still present.
  let mut removed = removed.load(Ordering::SeqCst);
  assert!(removed > 0);
  assert_eq!(set.len(), THREADS * ROUNDS - removed);
  while set.remove(&7) {
    removed += 1;
  }
  assert_eq!(removed, THREADS * ROUNDS);
  assert!(set.is_empty());
  assert!(!set.contains(&7));
}

#[test]
fn test_concurrent_mixed_operations_converge() {
  setup_tracing_for_test();
  const THREADS: usize = 6;
  const PER_THREAD: u64 = 1_000;
  let set = LockFreeSet::new();
  let barrier = Barrier::new(THREADS + 1);

  thread::scope(|scope| {
    for t in 0..THREADS as u64 {
      let (set, barrier) = (&set, &barrier);
      scope.spawn(move || {
        let mut values: Vec<u64> = (0..PER_THREAD).map(|i| t * PER_THREAD + i).collect();
        barrier.wait();
        for &v in &values {
          set.append(v);
        }
        values.shuffle(&mut rand::rng());
        for &v in values.iter().filter(|v| *v % 2 == 0) {
          assert!(set.remove(&v), "own value {} could not be removed", v);
        }
      });
    }

    // A reader probing throughout must never disturb the outcome.
    let (set, barrier) = (&set, &barrier);
    scope.spawn(move || {
      barrier.wait();
      for round in 0..50 {
        for v in (0..THREADS as u64 * PER_THREAD).step_by(37 + round) {
          let _ = set.contains(&v);
        }
        let _ = set.is_empty();
      }
    });
  });

  for v in 0..THREADS as u64 * PER_THREAD {
    assert_eq!(set.contains(&v), v % 2 == 1, "value {}", v);
  }
  assert_eq!(set.len(), THREADS * PER_THREAD as usize / 2);
}

#[test]
fn test_purge_after_concurrent_removals() {
  setup_tracing_for_test();
  let mut set: LockFreeSet<u32> = (0..1_000).collect();

  thread::scope(|scope| {
    for t in 0..4u32 {
      let set = &set;
      scope.spawn(move || {
        for v in (0..1_000).filter(|v| v % 4 == t && v % 10 != 0) {
          assert!(set.remove(&v));
        }
      });
    }
  });

  assert_eq!(set.purge(), 900);
  assert_eq!(set.len(), 100);
  assert!((0..1_000).step_by(10).all(|v| set.contains(&v)));
  assert_eq!(set.purge(), 0);
}

#[test]
fn test_set_shared_with_pool_tasks() {
  setup_tracing_for_test();
  let pool = TaskPool::new(4, "test_pool_with_set").unwrap();
  let set = Arc::new(LockFreeSet::new());

  let handles: Vec<_> = (0..16u32)
    .map(|chunk| {
      let set = set.clone();
      pool
        .submit(move || {
          for v in chunk * 100..(chunk + 1) * 100 {
            set.append(v);
          }
          (chunk * 100..(chunk + 1) * 100).filter(|v| v % 3 == 0).filter(|v| set.remove(v)).count()
        })
        .unwrap()
    })
    .collect();

  let removed: usize = handles.iter().map(|h| h.get().unwrap()).sum();
  assert_eq!(removed, (0..1_600).filter(|v| v % 3 == 0).count());
  assert_eq!(set.len(), 1_600 - removed);

  pool.shutdown();
}
