//! Reconciliation of optimistic actions against the event stream.
//!
//! After a mutating action succeeds the server is expected to emit an event
//! for the affected entity. If none arrives within the reconcile delay, the
//! entity is re-fetched once, bypassing the freshness window.
//!
//! Per-entity timestamps are kept only while they can still change a
//! decision: fetch times for the freshness window, event times for the
//! freshness window plus the reconcile delay. A response slower than that
//! costs at most one extra refetch.

use std::collections::HashMap;

use crate::timers::Deadlines;

#[derive(Debug, Clone)]
struct PendingCheck {
    entity_id: String,
    issued_at: i64,
}

#[derive(Debug, Clone)]
pub struct ReconcileScheduler {
    delay_ms: i64,
    freshness_ms: i64,
    /// Receipt time of the latest event per entity.
    last_event: HashMap<String, i64>,
    last_fetched: HashMap<String, i64>,
    checks: Deadlines<PendingCheck>,
}

impl ReconcileScheduler {
    pub fn new(delay_ms: u64, freshness_ms: u64) -> Self {
        Self {
            delay_ms: delay_ms as i64,
            freshness_ms: freshness_ms as i64,
            last_event: HashMap::new(),
            last_fetched: HashMap::new(),
            checks: Deadlines::new(),
        }
    }

    pub fn note_event(&mut self, entity_id: &str, received_at: i64) {
        self.prune(received_at);
        let slot = self.last_event.entry(entity_id.to_string()).or_default();
        *slot = (*slot).max(received_at);
    }

    pub fn last_event_at(&self, entity_id: &str) -> Option<i64> {
        self.last_event.get(entity_id).copied()
    }

    /// Arm a check for an action issued at `issued_at`, firing `delay_ms`
    /// after `now_ms`.
    pub fn schedule_check(&mut self, entity_id: &str, issued_at: i64, now_ms: i64) {
        self.checks.schedule(
            now_ms + self.delay_ms,
            PendingCheck {
                entity_id: entity_id.to_string(),
                issued_at,
            },
        );
    }

    /// Entities whose checks are due and saw no event since their action was
    /// issued. Each id appears at most once.
    pub fn due_refetches(&mut self, now_ms: i64) -> Vec<String> {
        self.prune(now_ms);
        let mut ids: Vec<String> = Vec::new();
        for check in self.checks.take_due(now_ms) {
            let last_event = self.last_event.get(&check.entity_id).copied().unwrap_or(0);
            if last_event < check.issued_at && !ids.contains(&check.entity_id) {
                ids.push(check.entity_id);
            }
        }
        ids
    }

    /// Whether a detail fetch should go out: always when forced, otherwise
    /// only outside the freshness window.
    pub fn should_fetch(&self, entity_id: &str, now_ms: i64, force: bool) -> bool {
        if force {
            return true;
        }
        match self.last_fetched.get(entity_id) {
            Some(fetched_at) => now_ms - fetched_at >= self.freshness_ms,
            None => true,
        }
    }

    pub fn mark_fetched(&mut self, entity_id: &str, now_ms: i64) {
        self.prune(now_ms);
        self.last_fetched.insert(entity_id.to_string(), now_ms);
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.checks.next_deadline()
    }

    pub fn pending_checks(&self) -> usize {
        self.checks.len()
    }

    /// Entities with a remembered event or fetch time.
    pub fn tracked_entities(&self) -> usize {
        self.last_event
            .keys()
            .chain(self.last_fetched.keys().filter(|id| !self.last_event.contains_key(*id)))
            .count()
    }

    fn prune(&mut self, now_ms: i64) {
        let fetched_cutoff = now_ms - self.freshness_ms;
        self.last_fetched.retain(|_, fetched_at| *fetched_at > fetched_cutoff);
        let event_cutoff = fetched_cutoff - self.delay_ms;
        self.last_event.retain(|_, received_at| *received_at > event_cutoff);
    }

    pub fn clear(&mut self) {
        self.last_event.clear();
        self.last_fetched.clear();
        self.checks.clear();
    }
}
