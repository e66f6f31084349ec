//! # Runtime Registry
//!
//! The single piece of shared mutable state the reconciler, the rollout
//! coordinator, and the backend selector all read and write: routing
//! tables, per-instance health bookkeeping, round-robin cursors, and
//! in-flight rollout statuses.
//!
//! ## Locking
//!
//! Everything lives behind one `std::sync::Mutex`. Every public method
//! takes the lock, does a bounded amount of map bookkeeping, and releases
//! it before returning — no method ever holds the lock across an `.await`
//! point, so a synchronous mutex is both simpler and cheaper here than an
//! async `RwLock`. Callers that need to act on a snapshot (the selector,
//! the rollout coordinator's health wait) clone what they need out under
//! the lock and release it before doing any I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::model::{RolloutStatus, RouteTarget};

#[derive(Default)]
struct RegistryState {
    /// Last known health per container id, for up/down transition detection.
    last_status: HashMap<String, bool>,
    /// Consecutive-failure counter per container id, reset to 0 on success.
    fail_counts: HashMap<String, u32>,
    /// Per-service routing table, replaced wholesale on every reconciler tick.
    routing: HashMap<String, Vec<RouteTarget>>,
    /// Round-robin cursors, keyed by an opaque string (e.g. `svc:checkout:ver`).
    rr_index: HashMap<String, usize>,
    /// In-flight and completed rollouts, keyed by rollout id.
    rollouts: HashMap<String, RolloutStatus>,
}

/// Shared runtime state for a single reconciler process.
pub struct RuntimeRegistry {
    state: Mutex<RegistryState>,
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Replace the routing table for `service` wholesale.
    pub fn set_targets(&self, service: &str, targets: Vec<RouteTarget>) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.routing.insert(service.to_string(), targets);
    }

    /// Snapshot the current routing table for `service`. Returns an empty
    /// vec if the service has never been reconciled.
    pub fn get_targets(&self, service: &str) -> Vec<RouteTarget> {
        let state = self.state.lock().expect("registry mutex poisoned");
        state.routing.get(service).cloned().unwrap_or_default()
    }

    /// Record a health probe result for `container_id`, returning the
    /// previous known state (`None` if never probed before) and the
    /// consecutive-failure count *after* this result is applied.
    pub fn mark_health(&self, container_id: &str, healthy: bool) -> (Option<bool>, u32) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let prev = state.last_status.insert(container_id.to_string(), healthy);

        let fail_count = if healthy {
            state.fail_counts.insert(container_id.to_string(), 0);
            0
        } else {
            let counter = state.fail_counts.entry(container_id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        (prev, fail_count)
    }

    /// Drop all tracked health state for a container, e.g. after it is
    /// replaced during self-heal so a fresh container starts clean.
    pub fn forget_container(&self, container_id: &str) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.last_status.remove(container_id);
        state.fail_counts.remove(container_id);
    }

    /// Return the current round-robin cursor for `key` modulo `n`, then
    /// advance it. If `n == 0` the cursor is left untouched and `0` is
    /// returned — there is nothing to round-robin over.
    pub fn next_index(&self, key: &str, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let mut state = self.state.lock().expect("registry mutex poisoned");
        let cursor = state.rr_index.entry(key.to_string()).or_insert(0);
        let current = *cursor % n;
        *cursor = (current + 1) % n;
        current
    }

    /// Insert or update a rollout status, refreshing `updated_at`.
    pub fn upsert_rollout(&self, mut status: RolloutStatus) {
        status.updated_at = Utc::now();
        let mut state = self.state.lock().expect("registry mutex poisoned");
        state.rollouts.insert(status.id.clone(), status);
    }

    /// Look up a rollout by id.
    pub fn get_rollout(&self, rollout_id: &str) -> Option<RolloutStatus> {
        let state = self.state.lock().expect("registry mutex poisoned");
        state.rollouts.get(rollout_id).cloned()
    }

    /// List all known rollouts, most-recently-updated order is not
    /// guaranteed; callers that need ordering should sort the result.
    pub fn list_rollouts(&self) -> Vec<RolloutStatus> {
        let state = self.state.lock().expect("registry mutex poisoned");
        state.rollouts.values().cloned().collect()
    }
}
