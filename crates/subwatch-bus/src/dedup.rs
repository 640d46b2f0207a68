//! Bounded FIFO set of recently seen event ids.

use std::collections::{HashSet, VecDeque};

pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Remembers the last `capacity` ids; the oldest is evicted on overflow.
#[derive(Debug)]
pub struct DedupWindow {
  capacity: usize,
  order:    VecDeque<String>,
  seen:     HashSet<String>,
}

impl DedupWindow {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      order: VecDeque::with_capacity(capacity),
      seen: HashSet::with_capacity(capacity),
    }
  }

  pub fn contains(&self, id: &str) -> bool { self.seen.contains(id) }

  /// Record `id`. Returns `false` if it was already present.
  pub fn remember(&mut self, id: &str) -> bool {
    if !self.seen.insert(id.to_owned()) {
      return false;
    }
    self.order.push_back(id.to_owned());
    if self.order.len() > self.capacity
      && let Some(oldest) = self.order.pop_front()
    {
      self.seen.remove(&oldest);
    }
    true
  }

  pub fn len(&self) -> usize { self.order.len() }

  pub fn is_empty(&self) -> bool { self.order.is_empty() }
}

impl Default for DedupWindow {
  fn default() -> Self { Self::new(DEFAULT_DEDUP_CAPACITY) }
}
