//! Normalized entity cache.
//!
//! Each panel keeps its entities in an [`EntityCache`]: a map keyed by id
//! plus a most-recently-active order list. The two always hold exactly the
//! same ids, and every update moves the touched id to the front.

mod log;

pub use log::BoundedLog;

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;

use crate::timers::Deadlines;

/// A record addressable by a stable string id.
pub trait Entity: Clone + Debug {
    /// Skeleton record for an id seen before its snapshot arrived.
    fn create(id: &str, now_ms: i64) -> Self;

    fn id(&self) -> &str;

    fn updated_at(&self) -> i64;

    fn set_updated_at(&mut self, at_ms: i64);

    /// Highlight marker set from the latest event timestamp.
    fn pulse(&self) -> Option<i64>;

    fn set_pulse(&mut self, pulse: Option<i64>);

    /// Advance `updated_at`, never moving it backwards.
    fn observe_update(&mut self, at_ms: i64) {
        if at_ms > self.updated_at() {
            self.set_updated_at(at_ms);
        }
    }
}

#[derive(Debug, Clone)]
struct PulseClear {
    id: String,
    pulse: i64,
}

#[derive(Debug, Clone)]
pub struct EntityCache<E> {
    by_id: HashMap<String, E>,
    order: Vec<String>,
    pulses: Deadlines<PulseClear>,
    pulse_ms: i64,
}

impl<E: Entity> EntityCache<E> {
    pub fn new(pulse_ms: u64) -> Self {
        Self {
            by_id: HashMap::new(),
            order: Vec::new(),
            pulses: Deadlines::new(),
            pulse_ms: pulse_ms as i64,
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids, most recently active first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn first_id(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    /// Entities in display order.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Look up `id`, creating a skeleton at the front of the order if absent.
    /// Existing entities keep their position.
    pub fn ensure(&mut self, id: &str, now_ms: i64) -> &mut E {
        if !self.by_id.contains_key(id) {
            self.order.insert(0, id.to_string());
        }
        self.by_id
            .entry(id.to_string())
            .or_insert_with(|| E::create(id, now_ms))
    }

    /// Ensure `id`, move it to the front and apply `f` to it.
    pub fn update<R>(&mut self, id: &str, now_ms: i64, f: impl FnOnce(&mut E) -> R) -> R {
        self.bump(id);
        let entity = self
            .by_id
            .entry(id.to_string())
            .or_insert_with(|| E::create(id, now_ms));
        f(entity)
    }

    /// Record event activity on `id`: set its pulse to `event_ts`, advance
    /// `updated_at`, move it to the front and schedule the pulse to clear
    /// `pulse_ms` after `now_ms`.
    pub fn touch(&mut self, id: &str, event_ts: i64, now_ms: i64) {
        self.update(id, now_ms, |entity| {
            entity.set_pulse(Some(event_ts));
            entity.observe_update(event_ts);
        });
        self.pulses.schedule(
            now_ms + self.pulse_ms,
            PulseClear {
                id: id.to_string(),
                pulse: event_ts,
            },
        );
    }

    /// Clear pulses whose deadline has passed, unless a newer pulse has
    /// replaced them. Returns how many were cleared.
    pub fn expire_pulses(&mut self, now_ms: i64) -> usize {
        let mut cleared = 0;
        for due in self.pulses.take_due(now_ms) {
            if let Some(entity) = self.by_id.get_mut(&due.id)
                && entity.pulse() == Some(due.pulse)
            {
                entity.set_pulse(None);
                cleared += 1;
            }
        }
        cleared
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.pulses.next_deadline()
    }

    /// Reorder after a list snapshot: snapshot ids first in server order,
    /// then previously known ids in their prior relative order.
    pub fn apply_snapshot_order(&mut self, snapshot_ids: &[String]) {
        let mut seen = HashSet::with_capacity(self.order.len());
        let mut order = Vec::with_capacity(self.order.len());
        for id in snapshot_ids {
            if self.by_id.contains_key(id) && seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        for id in &self.order {
            if seen.insert(id.clone()) {
                order.push(id.clone());
            }
        }
        self.order = order;
    }

    pub fn reset(&mut self) {
        self.by_id.clear();
        self.order.clear();
        self.pulses.clear();
    }

    /// The order list and the id map hold exactly the same ids, once each.
    pub fn is_consistent(&self) -> bool {
        let unique: HashSet<&String> = self.order.iter().collect();
        unique.len() == self.order.len()
            && self.order.len() == self.by_id.len()
            && self.order.iter().all(|id| self.by_id.contains_key(id))
    }

    fn bump(&mut self, id: &str) {
        match self.order.iter().position(|candidate| candidate == id) {
            Some(0) => {}
            Some(pos) => {
                let id = self.order.remove(pos);
                self.order.insert(0, id);
            }
            None => self.order.insert(0, id.to_string()),
        }
    }
}
