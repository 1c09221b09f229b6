//! Deadline queue for timers owned by reducer state.
//!
//! Reducers never spawn timers. They record deadlines here and the runtime
//! sleeps until [`Deadlines::next_deadline`], then hands back whatever is due.
//! Dropping the queue cancels every timer it holds.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Deadlines<T> {
    entries: BTreeMap<(i64, u64), T>,
    seq: u64,
}

impl<T> Default for Deadlines<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            seq: 0,
        }
    }
}

impl<T> Deadlines<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries sharing a deadline fire in insertion order.
    pub fn schedule(&mut self, at_ms: i64, item: T) {
        self.seq += 1;
        self.entries.insert((at_ms, self.seq), item);
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Remove and return every entry due at or before `now_ms`.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<T> {
        let later = self.entries.split_off(&(now_ms.saturating_add(1), 0));
        std::mem::replace(&mut self.entries, later)
            .into_values()
            .collect()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|_, item| keep(item));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Earliest of several optional deadlines.
pub fn earliest(deadlines: impl IntoIterator<Item = Option<i64>>) -> Option<i64> {
    deadlines.into_iter().flatten().min()
}
