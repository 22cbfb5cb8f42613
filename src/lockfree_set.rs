//! A lock-free singly-linked collection with logical and physical deletion.
//!
//! Nodes hang off an atomically updated `entry` pointer and link through
//! their `next` pointers toward a sentinel node that terminates every
//! traversal. New nodes are placed in front of the entry, so traversal visits
//! values in reverse append order. Removal first marks a node (the single
//! point that decides which caller removed it) and then unlinks it
//! opportunistically; any traversal that meets a marked node helps unlink it.
//!
//! Unlinked nodes are not freed while the set is shared: a racing traversal
//! may still be standing on one. Every node is also threaded onto an
//! append-only allocation chain, which `Drop` and [`LockFreeSet::purge`] use to
//! free each node exactly once.

use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crossbeam_utils::Backoff;
use tracing::debug;

struct Node<T> {
  /// `None` only for the sentinel.
  value: Option<T>,
  next: AtomicPtr<Node<T>>,
  removed: AtomicBool,
  /// Link in the allocation chain. Only read with exclusive access.
  allocated_next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
  fn alloc(value: Option<T>, next: *mut Node<T>) -> *mut Node<T> {
    Box::into_raw(Box::new(Node {
      value,
      next: AtomicPtr::new(next),
      removed: AtomicBool::new(false),
      allocated_next: AtomicPtr::new(ptr::null_mut()),
    }))
  }

  fn is_sentinel(&self) -> bool {
    self.value.is_none()
  }

  fn is_removed(&self) -> bool {
    self.removed.load(Ordering::Acquire)
  }

  /// Wins the removal race for this node, or reports that another caller did.
  fn mark_removed(&self) -> bool {
    self
      .removed
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

impl<T: PartialEq> Node<T> {
  fn holds(&self, value: &T) -> bool {
    self.value.as_ref() == Some(value)
  }
}

/// A lock-free collection supporting concurrent `append`, `remove` and
/// `contains`.
///
/// Duplicate values are independent nodes: each `append` adds one occurrence
/// and each successful `remove` takes away one. No operation takes a lock or
/// blocks; contended compare-and-swap steps are retried.
pub struct LockFreeSet<T> {
  /// The node traversals start from: the most recently appended live node,
  /// or one closer to the sentinel.
  entry: AtomicPtr<Node<T>>,
  sentinel: *mut Node<T>,
  /// Head of the allocation chain, covering every node ever created.
  allocated: AtomicPtr<Node<T>>,
  _marker: PhantomData<T>,
}

// SAFETY: nodes are only freed through `&mut self`, so sharing the set hands
// out `&T` across threads (needs `Sync`) and moves `T` between threads when the
// set is dropped elsewhere (needs `Send`).
unsafe impl<T: Send + Sync> Send for LockFreeSet<T> {}
unsafe impl<T: Send + Sync> Sync for LockFreeSet<T> {}

impl<T> LockFreeSet<T> {
  /// Creates an empty set holding only its sentinel.
  pub fn new() -> Self {
    let sentinel = Node::alloc(None, ptr::null_mut());
    Self {
      entry: AtomicPtr::new(sentinel),
      sentinel,
      allocated: AtomicPtr::new(sentinel),
      _marker: PhantomData,
    }
  }

  /// Returns `true` if no live node is left in front of the sentinel.
  ///
  /// Marked nodes found at the entry are unlinked on the way.
  pub fn is_empty(&self) -> bool {
    loop {
      let first = self.entry.load(Ordering::Acquire);
      // SAFETY: nodes reachable from `entry` are freed only through `&mut self`.
      let first_ref = unsafe { &*first };
      if first_ref.is_sentinel() {
        return true;
      }
      if !first_ref.is_removed() {
        return false;
      }
      self.advance_entry(first, first_ref);
    }
  }

  /// Adds one occurrence of `value` in front of the entry.
  pub fn append(&self, value: T) {
    let node = Node::alloc(Some(value), self.entry.load(Ordering::Acquire));
    self.track_allocation(node);
    // SAFETY: `node` was just allocated and is not freed before `self` is.
    let node_ref = unsafe { &*node };
    let backoff = Backoff::new();
    loop {
      let expected = node_ref.next.load(Ordering::Relaxed);
      match self
        .entry
        .compare_exchange_weak(expected, node, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return,
        Err(current) => node_ref.next.store(current, Ordering::Relaxed),
      }
      backoff.snooze();
    }
  }

  /// Iterates over the live values in traversal order, most recently appended
  /// first.
  ///
  /// Like `contains`, the walk is not a snapshot: values appended or removed
  /// concurrently may or may not be observed.
  pub fn iter(&self) -> Iter<'_, T> {
    Iter {
      current: self.entry.load(Ordering::Acquire),
      _set: PhantomData,
    }
  }

  /// Counts the live values met by one traversal.
  pub fn len(&self) -> usize {
    self.iter().count()
  }

  /// Unlinks every logically removed node and frees it. Returns the number of
  /// nodes reclaimed.
  ///
  /// Requires exclusive access; while the set is shared, removed nodes stay
  /// allocated until this is called or the set is dropped.
  pub fn purge(&mut self) -> usize {
    let sentinel = self.sentinel;

    // Relink the traversal chain through live nodes only.
    let mut first = *self.entry.get_mut();
    // SAFETY: exclusive access; every pointer in the chain is a live allocation.
    unsafe {
      while first != sentinel && (*first).is_removed() {
        first = (*first).next.load(Ordering::Relaxed);
      }
      *self.entry.get_mut() = first;
      let mut current = first;
      while current != sentinel {
        let mut next = (*current).next.load(Ordering::Relaxed);
        while next != sentinel && (*next).is_removed() {
          next = (*next).next.load(Ordering::Relaxed);
        }
        (*current).next.store(next, Ordering::Relaxed);
        current = next;
      }
    }

    // Rebuild the allocation chain without the removed nodes, freeing them.
    let mut reclaimed = 0;
    let mut kept: *mut Node<T> = ptr::null_mut();
    let mut cursor = *self.allocated.get_mut();
    while !cursor.is_null() {
      // SAFETY: every node appears on the allocation chain exactly once.
      unsafe {
        let following = (*cursor).allocated_next.load(Ordering::Relaxed);
        if (*cursor).is_removed() {
          drop(Box::from_raw(cursor));
          reclaimed += 1;
        } else {
          (*cursor).allocated_next.store(kept, Ordering::Relaxed);
          kept = cursor;
        }
        cursor = following;
      }
    }
    *self.allocated.get_mut() = kept;

    if reclaimed > 0 {
      debug!(reclaimed, "Purged removed nodes from lock-free set.");
    }
    reclaimed
  }

  fn track_allocation(&self, node: *mut Node<T>) {
    // SAFETY: `node` is a fresh allocation owned by this set.
    let node_ref = unsafe { &*node };
    let mut head = self.allocated.load(Ordering::Relaxed);
    let backoff = Backoff::new();
    loop {
      node_ref.allocated_next.store(head, Ordering::Relaxed);
      match self
        .allocated
        .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
      {
        Ok(_) => return,
        Err(current) => head = current,
      }
      backoff.snooze();
    }
  }

  /// Tries once to move the entry past the marked node `first`.
  fn advance_entry(&self, first: *mut Node<T>, first_ref: &Node<T>) {
    let successor = first_ref.next.load(Ordering::Acquire);
    let _ = self
      .entry
      .compare_exchange(first, successor, Ordering::AcqRel, Ordering::Acquire);
  }

  /// Tries once to unlink the marked node `candidate` from behind `current`.
  fn unlink_after(current: &Node<T>, candidate: *mut Node<T>, candidate_ref: &Node<T>) {
    let successor = candidate_ref.next.load(Ordering::Acquire);
    let _ = current
      .next
      .compare_exchange(candidate, successor, Ordering::AcqRel, Ordering::Acquire);
  }
}

impl<T: PartialEq> LockFreeSet<T> {
  /// Removes one live occurrence of `value`.
  ///
  /// Returns `true` only for the caller whose mark actually removed the node;
  /// a caller that loses the race to a concurrent `remove` of the same node
  /// keeps searching and returns `false` if no other occurrence is found.
  pub fn remove(&self, value: &T) -> bool {
    let backoff = Backoff::new();
    'restart: loop {
      let first = self.entry.load(Ordering::Acquire);
      // SAFETY: nodes reachable from `entry` are freed only through `&mut self`.
      let first_ref = unsafe { &*first };

      if first_ref.is_removed() {
        self.advance_entry(first, first_ref);
        continue 'restart;
      }
      if first_ref.holds(value) {
        if first_ref.mark_removed() {
          self.advance_entry(first, first_ref);
          return true;
        }
        backoff.snooze();
        continue 'restart;
      }

      let mut current_ref = first_ref;
      loop {
        let candidate = current_ref.next.load(Ordering::Acquire);
        if candidate.is_null() {
          // `current` is the sentinel.
          return false;
        }
        // SAFETY: as above.
        let candidate_ref = unsafe { &*candidate };

        if candidate_ref.is_removed() {
          Self::unlink_after(current_ref, candidate, candidate_ref);
          continue;
        }
        if candidate_ref.holds(value) {
          if candidate_ref.mark_removed() {
            Self::unlink_after(current_ref, candidate, candidate_ref);
            return true;
          }
          backoff.snooze();
          continue 'restart;
        }
        current_ref = candidate_ref;
      }
    }
  }

  /// Returns `true` if a live node holding `value` is met during one pass from
  /// the entry to the sentinel.
  ///
  /// Marked nodes met on the way are unlinked. A value removed concurrently
  /// may or may not be observed.
  pub fn contains(&self, value: &T) -> bool {
    let mut first = self.entry.load(Ordering::Acquire);
    // SAFETY: nodes reachable from `entry` are freed only through `&mut self`.
    let mut first_ref = unsafe { &*first };
    while first_ref.is_removed() {
      self.advance_entry(first, first_ref);
      first = first_ref.next.load(Ordering::Acquire);
      // SAFETY: as above.
      first_ref = unsafe { &*first };
    }
    if first_ref.holds(value) {
      return true;
    }

    let mut current_ref = first_ref;
    loop {
      let candidate = current_ref.next.load(Ordering::Acquire);
      if candidate.is_null() {
        return false;
      }
      // SAFETY: as above.
      let candidate_ref = unsafe { &*candidate };

      if candidate_ref.is_removed() {
        Self::unlink_after(current_ref, candidate, candidate_ref);
        continue;
      }
      if candidate_ref.holds(value) {
        return true;
      }
      current_ref = candidate_ref;
    }
  }
}

impl<T> Default for LockFreeSet<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Drop for LockFreeSet<T> {
  fn drop(&mut self) {
    let mut cursor = *self.allocated.get_mut();
    while !cursor.is_null() {
      // SAFETY: exclusive access; every node appears on the allocation chain
      // exactly once.
      let node = unsafe { Box::from_raw(cursor) };
      cursor = node.allocated_next.load(Ordering::Relaxed);
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for LockFreeSet<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.iter()).finish()
  }
}

impl<T> Extend<T> for LockFreeSet<T> {
  fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
    for value in iter {
      self.append(value);
    }
  }
}

impl<T> FromIterator<T> for LockFreeSet<T> {
  fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
    let mut set = Self::new();
    set.extend(iter);
    set
  }
}

impl<'a, T> IntoIterator for &'a LockFreeSet<T> {
  type Item = &'a T;
  type IntoIter = Iter<'a, T>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

/// Iterator over the live values of a [`LockFreeSet`], created by
/// [`LockFreeSet::iter`].
pub struct Iter<'a, T> {
  current: *mut Node<T>,
  _set: PhantomData<&'a LockFreeSet<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
  type Item = &'a T;

  fn next(&mut self) -> Option<&'a T> {
    while !self.current.is_null() {
      // SAFETY: the borrow of the set keeps every node allocated for `'a`.
      let node: &'a Node<T> = unsafe { &*self.current };
      self.current = node.next.load(Ordering::Acquire);
      if node.is_removed() {
        continue;
      }
      if let Some(value) = node.value.as_ref() {
        return Some(value);
      }
    }
    None
  }
}

impl<T> FusedIterator for Iter<'_, T> {}
