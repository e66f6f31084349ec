//! # Rollout Coordinator
//!
//! Drives a canary/blue-green rollout for one service: registers a
//! candidate version at an initial traffic share, rebalances its active
//! siblings to absorb the remainder, and then advances the candidate's
//! weight through a step schedule — either one step at a time via
//! [`RolloutCoordinator::continue_rollout`], or automatically via a
//! background worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{error, info};

use crate::error::CoreError;
use crate::model::{
    validate_health_path, validate_service_name, validate_version_label, EventLevel, RolloutState,
    RolloutStatus, Version, VersionState,
};
use crate::registry::RuntimeRegistry;
use crate::store::Store;

/// Parameters and progress of one rollout, keyed by [`RolloutStatus::id`]
/// in [`RolloutCoordinator`]'s internal map. Not part of the public data
/// model proper — [`RolloutStatus`] is what callers observe; this is the
/// coordinator's own bookkeeping to resume a step sequence.
#[derive(Debug, Clone)]
struct RolloutPlan {
    service: String,
    to_version: String,
    step_interval: Duration,
    max_wait: Duration,
    steps: Vec<u32>,
    step_index: usize,
}

/// Request to start a new rollout.
pub struct StartRollout<'a> {
    pub service: &'a str,
    pub to_version: &'a str,
    pub image: &'a str,
    pub internal_port: u16,
    pub health_path: &'a str,
    pub replicas: u32,
    pub canary_weight: u32,
    pub step_percent: u32,
    pub step_interval_s: u64,
    pub auto: bool,
    pub max_wait_s: u64,
}

/// Coordinates in-flight rollouts against a [`Store`] and [`Engine`],
/// recording progress in the shared [`RuntimeRegistry`].
pub struct RolloutCoordinator {
    store: Arc<dyn Store>,
    registry: Arc<RuntimeRegistry>,
    plans: Mutex<HashMap<String, RolloutPlan>>,
}

impl RolloutCoordinator {
    pub fn new(store: Arc<dyn Store>, registry: Arc<RuntimeRegistry>) -> Self {
        Self {
            store,
            registry,
            plans: Mutex::new(HashMap::new()),
        }
    }

    /// Register the candidate version, rebalance its active siblings, and
    /// record an in-flight rollout. If `auto` is set, spawns a background
    /// task that advances the schedule on its own; otherwise the caller
    /// drives progress via [`Self::continue_rollout`].
    pub fn start_rollout(
        self: &Arc<Self>,
        request: StartRollout<'_>,
    ) -> Result<RolloutStatus, CoreError> {
        validate_service_name(request.service)?;
        validate_version_label(request.to_version)?;
        validate_health_path(request.health_path)?;

        let canary_weight = request.canary_weight.min(100);
        let step_percent = request.step_percent.clamp(1, 100);
        let step_interval_s = request.step_interval_s.max(1);
        let replicas = request.replicas.max(1);
        let max_wait_s = request.max_wait_s.max(1);

        let service = self.store.get_or_create_service(request.service)?;
        let candidate = self.store.upsert_version(Version {
            id: 0,
            service_id: service.id,
            version_label: request.to_version.to_string(),
            image: request.image.to_string(),
            internal_port: request.internal_port,
            health_path: request.health_path.to_string(),
            desired_replicas: replicas,
            route_weight: canary_weight,
            state: VersionState::Candidate,
            created_at: Utc::now(),
        })?;

        let active_siblings: Vec<Version> = self
            .store
            .list_versions(Some(request.service))?
            .into_iter()
            .filter(|v| v.state == VersionState::Active && v.id != candidate.id)
            .collect();
        self.rebalance_old_versions(&active_siblings, 100 - canary_weight)?;

        let mut steps: Vec<u32> = (canary_weight..=100).step_by(step_percent as usize).collect();
        if steps.last() != Some(&100) {
            steps.push(100);
        }

        let rollout_id = format!("{:012x}", rand::thread_rng().gen_range(0..u64::MAX));
        let now = Utc::now();
        let status = RolloutStatus {
            id: rollout_id.clone(),
            service: request.service.to_string(),
            to_version: request.to_version.to_string(),
            state: if request.auto {
                RolloutState::Running
            } else {
                RolloutState::Paused
            },
            message: String::new(),
            started_at: now,
            updated_at: now,
        };
        self.registry.upsert_rollout(status.clone());
        self.store.log_event(
            EventLevel::Info,
            Some(request.service),
            Some(request.to_version),
            &format!("rollout {rollout_id} started at weight {canary_weight}"),
        );

        let plan = RolloutPlan {
            service: request.service.to_string(),
            to_version: request.to_version.to_string(),
            step_interval: Duration::from_secs(step_interval_s),
            max_wait: Duration::from_secs(max_wait_s),
            steps,
            step_index: 0,
        };
        self.plans
            .lock()
            .expect("rollout plans mutex poisoned")
            .insert(rollout_id.clone(), plan);

        if request.auto {
            let coordinator = self.clone();
            let id = rollout_id.clone();
            tokio::spawn(async move {
                coordinator.run_auto(&id).await;
            });
        }

        Ok(status)
    }

    /// Advance a paused rollout by one step, after confirming the
    /// candidate is healthy. A no-op on an already-terminal rollout.
    pub async fn continue_rollout(&self, rollout_id: &str) -> Result<RolloutStatus, CoreError> {
        let status = self
            .registry
            .get_rollout(rollout_id)
            .ok_or_else(|| CoreError::UnknownRollout(rollout_id.to_string()))?;
        if status.state.is_terminal() {
            return Ok(status);
        }

        let plan = self.plan_snapshot(rollout_id)?;
        let healthy = self.wait_candidate_healthy(&plan).await;
        if !healthy {
            return Ok(self.mark_failed(rollout_id, &plan, "candidate did not become healthy in time"));
        }

        let mut plan = plan;
        plan.step_index = (plan.step_index + 1).min(plan.steps.len() - 1);
        let weight = plan.steps[plan.step_index];
        self.apply_weight(&plan.service, &plan.to_version, weight)?;

        let done = plan.step_index == plan.steps.len() - 1;
        let new_state = if done { RolloutState::Done } else { RolloutState::Paused };
        let updated = self.save_progress(rollout_id, &plan, new_state, "");

        self.store.log_event(
            EventLevel::Info,
            Some(&plan.service),
            Some(&plan.to_version),
            &format!("rollout {rollout_id} advanced to weight {weight}"),
        );
        info!(rollout_id, weight, "rollout step applied");

        if done {
            self.finalize(&plan.service, &plan.to_version)?;
        }

        Ok(updated)
    }

    /// List all known rollouts.
    pub fn list_rollouts(&self) -> Vec<RolloutStatus> {
        self.registry.list_rollouts()
    }

    pub fn get_rollout(&self, rollout_id: &str) -> Option<RolloutStatus> {
        self.registry.get_rollout(rollout_id)
    }

    async fn run_auto(self: Arc<Self>, rollout_id: &str) {
        let plan = match self.plan_snapshot(rollout_id) {
            Ok(plan) => plan,
            Err(_) => return,
        };

        if !self.wait_candidate_healthy(&plan).await {
            self.mark_failed(rollout_id, &plan, "candidate did not become healthy in time");
            return;
        }

        // Re-applies steps[0] even though start_rollout already set that
        // weight; harmless since set_version_weight is idempotent, and it
        // keeps this worker's progression logic identical regardless of
        // whether it was entered via continue_rollout or here.
        let mut plan = plan;
        for (index, weight) in plan.steps.clone().into_iter().enumerate() {
            if let Err(err) = self.apply_weight(&plan.service, &plan.to_version, weight) {
                error!(rollout_id, error = %err, "auto rollout failed to apply weight");
                self.mark_failed(rollout_id, &plan, &err.to_string());
                return;
            }
            plan.step_index = index;
            let done = weight >= 100;
            let state = if done { RolloutState::Done } else { RolloutState::Running };
            self.save_progress(rollout_id, &plan, state, "");
            info!(rollout_id, weight, "auto rollout step applied");

            if done {
                if let Err(err) = self.finalize(&plan.service, &plan.to_version) {
                    error!(rollout_id, error = %err, "auto rollout finalize failed");
                }
                return;
            }
            tokio::time::sleep(plan.step_interval).await;
        }
    }

    fn plan_snapshot(&self, rollout_id: &str) -> Result<RolloutPlan, CoreError> {
        self.plans
            .lock()
            .expect("rollout plans mutex poisoned")
            .get(rollout_id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownRollout(rollout_id.to_string()))
    }

    fn save_progress(
        &self,
        rollout_id: &str,
        plan: &RolloutPlan,
        state: RolloutState,
        message: &str,
    ) -> RolloutStatus {
        self.plans
            .lock()
            .expect("rollout plans mutex poisoned")
            .insert(rollout_id.to_string(), plan.clone());

        let mut status = self
            .registry
            .get_rollout(rollout_id)
            .expect("rollout registered at start_rollout time");
        status.state = state;
        status.message = message.to_string();
        self.registry.upsert_rollout(status.clone());
        status
    }

    fn mark_failed(&self, rollout_id: &str, plan: &RolloutPlan, message: &str) -> RolloutStatus {
        self.store.log_event(
            EventLevel::Error,
            Some(&plan.service),
            Some(&plan.to_version),
            &format!("rollout {rollout_id} failed: {message}"),
        );
        self.save_progress(rollout_id, plan, RolloutState::Failed, message)
    }

    async fn wait_candidate_healthy(&self, plan: &RolloutPlan) -> bool {
        let deadline = tokio::time::Instant::now() + plan.max_wait;
        loop {
            if let Ok(version) = self.store.get_version(&plan.service, &plan.to_version) {
                if let Ok(instances) = self.store.list_instances(version.id) {
                    let all_up = !instances.is_empty()
                        && instances
                            .iter()
                            .all(|i| i.status == crate::model::InstanceStatus::Up)
                        && instances.len() as u32 >= version.desired_replicas;
                    if all_up {
                        return true;
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    fn apply_weight(&self, service: &str, to_version: &str, new_weight: u32) -> Result<(), CoreError> {
        let new_weight = new_weight.min(100);
        let version = self.store.get_version(service, to_version)?;
        self.store.set_version_weight(version.id, new_weight)?;

        let siblings: Vec<Version> = self
            .store
            .list_versions(Some(service))?
            .into_iter()
            .filter(|v| v.state == VersionState::Active && v.id != version.id)
            .collect();
        self.rebalance_old_versions(&siblings, 100 - new_weight)?;
        Ok(())
    }

    /// Distribute `target_total` across `old_versions` proportionally to
    /// their current weight. The last version (in input order) absorbs
    /// whatever rounding remainder is left, so the sum always lands
    /// exactly on `target_total`.
    fn rebalance_old_versions(&self, old_versions: &[Version], target_total: u32) -> Result<(), CoreError> {
        let target_total = target_total.min(100);
        if old_versions.is_empty() {
            return Ok(());
        }
        if old_versions.len() == 1 {
            self.store.set_version_weight(old_versions[0].id, target_total)?;
            return Ok(());
        }

        let current_total: u32 = old_versions.iter().map(|v| v.route_weight).sum::<u32>().max(1);
        let mut assigned = 0u32;
        for version in &old_versions[..old_versions.len() - 1] {
            // Round-half-up, matching the original's `round(target * w / cur)`
            // rather than truncating: e.g. weight=67, cur_total=100,
            // target=50 must land on 34, not 33.
            let numerator = target_total as u64 * version.route_weight as u64 + current_total as u64 / 2;
            let share = numerator / current_total as u64;
            let share = (share as u32).min(target_total);
            self.store.set_version_weight(version.id, share)?;
            assigned += share;
        }
        let last = old_versions.last().expect("checked non-empty above");
        let remainder = target_total.saturating_sub(assigned);
        self.store.set_version_weight(last.id, remainder)?;
        Ok(())
    }

    fn finalize(&self, service: &str, to_version: &str) -> Result<(), CoreError> {
        let version = self.store.get_version(service, to_version)?;
        self.store.set_version_state(version.id, VersionState::Active)?;

        let siblings: Vec<Version> = self
            .store
            .list_versions(Some(service))?
            .into_iter()
            .filter(|v| v.state == VersionState::Active && v.id != version.id)
            .collect();
        for sibling in siblings {
            self.store.set_version_state(sibling.id, VersionState::Retired)?;
            self.store.set_version_weight(sibling.id, 0)?;
            self.store.set_version_replicas(sibling.id, 0)?;
        }
        Ok(())
    }
}
