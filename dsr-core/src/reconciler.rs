//! # Reconciler Loop
//!
//! The control loop that drives observed state toward desired state: for
//! every version in `{active, candidate}`, align running instance count
//! to `desired_replicas`, probe health and self-heal failing instances,
//! then rebuild the routing table from what's left standing.
//!
//! ## Tick ordering
//!
//! Each tick runs three full passes over the version set, in order:
//! replica alignment for every version, then health-and-self-heal for
//! every version, then one routing rebuild. Interleaving these per
//! version (align, then heal, then route, one version at a time) would
//! also satisfy the spec's wording, but the original system this was
//! distilled from runs full passes, and new instances created by the
//! alignment pass — which start in `starting`, not `up` — end up probed
//! in the same tick they were created rather than a tick later. We keep
//! that behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::alert::{AlertEvent, AlertSink};
use crate::config::DsrConfig;
use crate::engine::Engine;
use crate::error::CoreError;
use crate::health::HealthProbe;
use crate::model::{EventLevel, Instance, InstanceStatus, RouteTarget, Version, VersionState};
use crate::registry::RuntimeRegistry;
use crate::store::Store;

/// The reconciler's collaborators and the single tick operation, shared
/// between the library caller driving it manually (tests) and the
/// background worker spawned by [`Reconciler::spawn`].
pub struct Reconciler {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    registry: Arc<RuntimeRegistry>,
    health: HealthProbe,
    alert: Arc<dyn AlertSink>,
    config: DsrConfig,
}

/// Handle to a running background reconciler task.
pub struct ReconcilerHandle {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the background task to stop after its current tick and
    /// wait for it to finish.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        registry: Arc<RuntimeRegistry>,
        alert: Arc<dyn AlertSink>,
        config: DsrConfig,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            health: HealthProbe::new(),
            alert,
            config,
        }
    }

    /// Spawn the reconciler as a long-lived background task that ticks
    /// every `poll_interval`, logging and continuing past any tick-level
    /// error rather than exiting the process.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_task = stop.clone();
        let reconciler = self.clone();
        let task = tokio::spawn(async move {
            while !stop_for_task.load(Ordering::SeqCst) {
                if let Err(err) = reconciler.tick().await {
                    error!(error = %err, "reconciler tick failed");
                }
                tokio::time::sleep(reconciler.config.poll_interval.max(Duration::from_secs(1))).await;
            }
        });
        ReconcilerHandle { stop, task }
    }

    fn active_or_candidate_versions(&self) -> Result<Vec<Version>, CoreError> {
        Ok(self
            .store
            .list_versions(None)?
            .into_iter()
            .filter(|v| matches!(v.state, VersionState::Active | VersionState::Candidate))
            .collect())
    }

    /// Run one full reconciliation pass.
    pub async fn tick(&self) -> Result<(), CoreError> {
        let versions = self.active_or_candidate_versions()?;

        for version in &versions {
            self.ensure_replicas(version).await?;
        }

        // Re-read versions in case ensure_replicas changed instance counts
        // that a later pass depends on; the version rows themselves are
        // untouched by ensure_replicas, so this is only a defensive
        // refresh, not a requirement.
        for version in &versions {
            self.health_and_self_heal(version).await?;
        }

        self.rebuild_routing(&versions)?;

        Ok(())
    }

    async fn ensure_replicas(&self, version: &Version) -> Result<(), CoreError> {
        if !self.engine.available() {
            return Ok(());
        }

        let service_name = self.service_name(version.service_id)?;
        let running = self.engine.list(&service_name, &version.version_label)?;
        let running_ids: std::collections::HashSet<&str> =
            running.iter().map(|c| c.id.as_str()).collect();

        let stored = self.store.list_instances(version.id)?;
        for instance in &stored {
            if !running_ids.contains(instance.container_id.as_str()) {
                self.store.delete_instance(instance.id)?;
                self.registry.forget_container(&instance.container_id);
            }
        }

        let desired = version.desired_replicas as usize;
        if running.len() > desired {
            let extra = running.len() - desired;
            for container in running.iter().rev().take(extra) {
                self.engine.remove(&container.id)?;
                if let Some(instance) = stored
                    .iter()
                    .find(|i| i.container_id == container.id)
                {
                    self.store.delete_instance(instance.id)?;
                }
                self.registry.forget_container(&container.id);
            }
        } else if running.len() < desired {
            let missing = desired - running.len();
            for _ in 0..missing {
                let container = self.engine.create_and_start(
                    &service_name,
                    &version.version_label,
                    &version.image,
                    version.internal_port,
                    &self.config.docker_network,
                )?;
                self.store.insert_instance(Instance {
                    id: 0,
                    version_id: version.id,
                    container_id: container.id,
                    container_name: container.name,
                    status: InstanceStatus::Starting,
                    last_health_ts: None,
                    last_latency_ms: None,
                    restart_count: 0,
                    created_at: chrono::Utc::now(),
                })?;
            }
        }

        Ok(())
    }

    async fn health_and_self_heal(&self, version: &Version) -> Result<(), CoreError> {
        let service_name = self.service_name(version.service_id)?;
        let instances = self.store.list_instances(version.id)?;

        for instance in instances {
            let url = format!(
                "{}{}",
                self.engine.http_base(&instance.container_name, version.internal_port),
                version.health_path
            );
            let (healthy, message, latency_ms) =
                self.health.check(&url, self.config.gateway_timeout).await;

            self.store.update_instance_health(
                instance.id,
                if healthy { InstanceStatus::Up } else { InstanceStatus::Down },
                Some(latency_ms),
            )?;

            let (prev, fail_count) = self.registry.mark_health(&instance.container_id, healthy);

            match (prev, healthy) {
                (Some(true), false) => {
                    self.log_event(
                        EventLevel::Warn,
                        Some(&service_name),
                        Some(&version.version_label),
                        &format!("instance {} went down: {message}", instance.container_name),
                    );
                }
                (Some(false), true) => {
                    self.log_event(
                        EventLevel::Info,
                        Some(&service_name),
                        Some(&version.version_label),
                        &format!("instance {} recovered", instance.container_name),
                    );
                }
                _ => {}
            }

            if !healthy && fail_count >= self.config.fail_threshold && self.engine.available() {
                self.log_event(
                    EventLevel::Error,
                    Some(&service_name),
                    Some(&version.version_label),
                    &format!(
                        "instance {} failed {fail_count} consecutive checks, replacing",
                        instance.container_name
                    ),
                );
                self.store.bump_restart_count(instance.id)?;
                self.engine.remove(&instance.container_id)?;
                self.store.delete_instance(instance.id)?;
                self.registry.forget_container(&instance.container_id);

                let replacement = self.engine.create_and_start(
                    &service_name,
                    &version.version_label,
                    &version.image,
                    version.internal_port,
                    &self.config.docker_network,
                )?;
                self.store.insert_instance(Instance {
                    id: 0,
                    version_id: version.id,
                    container_id: replacement.id,
                    container_name: replacement.name,
                    status: InstanceStatus::Starting,
                    last_health_ts: None,
                    last_latency_ms: None,
                    restart_count: 0,
                    created_at: chrono::Utc::now(),
                })?;
            }
        }

        Ok(())
    }

    fn rebuild_routing(&self, versions: &[Version]) -> Result<(), CoreError> {
        let services = self.store.list_services()?;
        let mut by_service: std::collections::HashMap<String, Vec<RouteTarget>> =
            services.iter().map(|s| (s.name.clone(), Vec::new())).collect();

        for version in versions {
            if version.route_weight == 0 {
                continue;
            }
            let service_name = self.service_name(version.service_id)?;
            let instances = self.store.list_instances(version.id)?;
            let targets = by_service.entry(service_name.clone()).or_default();
            for instance in instances.into_iter().filter(|i| i.status == InstanceStatus::Up) {
                targets.push(RouteTarget {
                    service: service_name.clone(),
                    version: version.version_label.clone(),
                    base_url: self
                        .engine
                        .http_base(&instance.container_name, version.internal_port),
                    weight: version.route_weight,
                    last_latency_ms: instance.last_latency_ms,
                });
            }
        }

        for (service_name, targets) in by_service {
            self.registry.set_targets(&service_name, targets);
        }

        Ok(())
    }

    fn service_name(&self, service_id: u64) -> Result<String, CoreError> {
        self.store
            .list_services()?
            .into_iter()
            .find(|s| s.id == service_id)
            .map(|s| s.name)
            .ok_or_else(|| CoreError::Validation(format!("unknown service id {service_id}")))
    }

    fn log_event(&self, level: EventLevel, service: Option<&str>, version: Option<&str>, message: &str) {
        match level {
            EventLevel::Info => info!(?service, ?version, "{message}"),
            EventLevel::Warn => warn!(?service, ?version, "{message}"),
            EventLevel::Error => error!(?service, ?version, "{message}"),
        }
        self.store.log_event(level, service, version, message);
        if let (Some(service), Some(version)) = (service, version) {
            self.alert.notify(AlertEvent {
                level,
                service: service.to_string(),
                version: version.to_string(),
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NullAlertSink;
    use crate::engine::FakeEngine;
    use crate::store::MemoryStore;

    fn sample_version(service_id: u64, label: &str, replicas: u32, weight: u32) -> Version {
        Version {
            id: 0,
            service_id,
            version_label: label.to_string(),
            image: "repo/img:tag".to_string(),
            internal_port: 8080,
            health_path: "/health".to_string(),
            desired_replicas: replicas,
            route_weight: weight,
            state: VersionState::Active,
            created_at: chrono::Utc::now(),
        }
    }

    fn build() -> (Reconciler, Arc<MemoryStore>, Arc<FakeEngine>, Arc<RuntimeRegistry>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let registry = Arc::new(RuntimeRegistry::new());
        let reconciler = Reconciler::new(
            store.clone(),
            engine.clone(),
            registry.clone(),
            Arc::new(NullAlertSink),
            DsrConfig::default(),
        );
        (reconciler, store, engine, registry)
    }

    #[tokio::test]
    async fn ensure_replicas_creates_missing_instances() {
        let (reconciler, store, _engine, _registry) = build();
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store
            .upsert_version(sample_version(svc.id, "v1", 3, 100))
            .unwrap();

        reconciler.ensure_replicas(&version).await.unwrap();

        assert_eq!(store.list_instances(version.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ensure_replicas_scales_down_newest_first() {
        let (reconciler, store, _engine, _registry) = build();
        let svc = store.get_or_create_service("checkout").unwrap();
        let mut version = store
            .upsert_version(sample_version(svc.id, "v1", 3, 100))
            .unwrap();
        reconciler.ensure_replicas(&version).await.unwrap();
        assert_eq!(store.list_instances(version.id).unwrap().len(), 3);

        version.desired_replicas = 1;
        store.upsert_version(version.clone()).unwrap();
        reconciler.ensure_replicas(&version).await.unwrap();
        assert_eq!(store.list_instances(version.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_replicas_is_a_noop_when_engine_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::unavailable());
        let registry = Arc::new(RuntimeRegistry::new());
        let reconciler = Reconciler::new(
            store.clone(),
            engine,
            registry,
            Arc::new(NullAlertSink),
            DsrConfig::default(),
        );
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store
            .upsert_version(sample_version(svc.id, "v1", 3, 100))
            .unwrap();

        reconciler.ensure_replicas(&version).await.unwrap();
        assert!(store.list_instances(version.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn self_heal_replaces_instance_after_threshold_failures() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(FakeEngine::new());
        let registry = Arc::new(RuntimeRegistry::new());
        let mut config = DsrConfig::default();
        config.gateway_timeout = Duration::from_millis(200);
        let reconciler = Reconciler::new(
            store.clone(),
            engine,
            registry.clone(),
            Arc::new(NullAlertSink),
            config,
        );
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store
            .upsert_version(sample_version(svc.id, "v1", 1, 100))
            .unwrap();
        reconciler.ensure_replicas(&version).await.unwrap();
        let original = store.list_instances(version.id).unwrap().remove(0);

        // Force both probes to fail: the fake engine's containers are not
        // reachable over real HTTP, so every probe in this test environment
        // reports unhealthy already. Drive mark_health directly to model
        // the exact threshold-crossing semantics under test.
        registry.mark_health(&original.container_id, false);
        let (_, fail_count) = registry.mark_health(&original.container_id, false);
        assert!(fail_count >= reconciler.config.fail_threshold);

        reconciler.health_and_self_heal(&version).await.unwrap();

        let instances = store.list_instances(version.id).unwrap();
        assert_eq!(instances.len(), 1);
        assert_ne!(instances[0].container_id, original.container_id);
    }

    #[tokio::test]
    async fn rebuild_routing_only_includes_up_instances_with_weight() {
        let (reconciler, store, _engine, registry) = build();
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store
            .upsert_version(sample_version(svc.id, "v1", 1, 100))
            .unwrap();
        reconciler.ensure_replicas(&version).await.unwrap();
        let instance = store.list_instances(version.id).unwrap().remove(0);
        store
            .update_instance_health(instance.id, InstanceStatus::Up, Some(1.0))
            .unwrap();

        reconciler.rebuild_routing(&[version.clone()]).unwrap();

        let targets = registry.get_targets("checkout");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].version, "v1");
    }

    #[tokio::test]
    async fn rebuild_routing_seeds_empty_entry_for_services_with_no_weighted_versions() {
        let (reconciler, store, _engine, registry) = build();
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store
            .upsert_version(sample_version(svc.id, "v1", 1, 0))
            .unwrap();

        reconciler.rebuild_routing(&[version]).unwrap();

        assert!(registry.get_targets("checkout").is_empty());
    }
}
