//! # Store
//!
//! The persisted-state boundary: services, versions, instances, and the
//! audit event log. A production deployment wires this to a relational
//! database; [`MemoryStore`] is an in-memory fake for tests and for
//! running the agent without external dependencies.
//!
//! All operations are synchronous and safe for concurrent callers — the
//! reconciler, the rollout coordinator, and (when present) an external
//! API surface all call through the same `Store` instance without
//! external locking of their own.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::StoreError;
use crate::model::{Event, EventLevel, Instance, InstanceStatus, Service, Version, VersionState};

/// The persisted-state boundary.
pub trait Store: Send + Sync {
    fn get_or_create_service(&self, name: &str) -> Result<Service, StoreError>;
    fn list_services(&self) -> Result<Vec<Service>, StoreError>;

    /// Idempotent upsert keyed on `(service_id, version_label)`: updates
    /// image/port/health_path/replicas/weight/state if the pair already
    /// exists, otherwise inserts a new row.
    fn upsert_version(&self, version: Version) -> Result<Version, StoreError>;
    fn list_versions(&self, service_name: Option<&str>) -> Result<Vec<Version>, StoreError>;
    fn get_version(&self, service_name: &str, version_label: &str) -> Result<Version, StoreError>;
    fn set_version_state(&self, version_id: u64, state: VersionState) -> Result<(), StoreError>;
    fn set_version_weight(&self, version_id: u64, weight: u32) -> Result<(), StoreError>;
    fn set_version_replicas(&self, version_id: u64, replicas: u32) -> Result<(), StoreError>;

    fn list_instances(&self, version_id: u64) -> Result<Vec<Instance>, StoreError>;
    fn insert_instance(&self, instance: Instance) -> Result<Instance, StoreError>;
    fn update_instance_health(
        &self,
        instance_id: u64,
        status: InstanceStatus,
        latency_ms: Option<f64>,
    ) -> Result<(), StoreError>;
    fn bump_restart_count(&self, instance_id: u64) -> Result<(), StoreError>;
    /// Removes the instance row. Cascades are not relevant here (instances
    /// have no children) but deleting a version must cascade to its
    /// instances; see [`MemoryStore`]'s internal bookkeeping.
    fn delete_instance(&self, instance_id: u64) -> Result<(), StoreError>;

    fn log_event(&self, level: EventLevel, service: Option<&str>, version: Option<&str>, message: &str);
    fn latest_events(&self, limit: usize) -> Vec<Event>;
}

#[derive(Default)]
struct MemoryStoreState {
    services: HashMap<u64, Service>,
    service_ids_by_name: HashMap<String, u64>,
    versions: HashMap<u64, Version>,
    instances: HashMap<u64, Instance>,
    events: Vec<Event>,
    next_service_id: u64,
    next_version_id: u64,
    next_instance_id: u64,
}

/// In-memory [`Store`] fake. Honors the uniqueness constraint on
/// `(service_id, version_label)` and cascades instance deletion when a
/// version would otherwise leave orphaned instance rows (the reconciler
/// never deletes versions itself, but tests exercise the invariant
/// directly).
pub struct MemoryStore {
    state: Mutex<MemoryStoreState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryStoreState::default()),
        }
    }
}

impl Store for MemoryStore {
    fn get_or_create_service(&self, name: &str) -> Result<Service, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if let Some(&id) = state.service_ids_by_name.get(name) {
            return Ok(state.services[&id].clone());
        }
        state.next_service_id += 1;
        let id = state.next_service_id;
        let service = Service {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.service_ids_by_name.insert(name.to_string(), id);
        state.services.insert(id, service.clone());
        Ok(service)
    }

    fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.services.values().cloned().collect())
    }

    fn upsert_version(&self, mut version: Version) -> Result<Version, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let existing_id = state.versions.values().find_map(|v| {
            (v.service_id == version.service_id && v.version_label == version.version_label)
                .then_some(v.id)
        });

        match existing_id {
            Some(id) => {
                version.id = id;
                state.versions.insert(id, version.clone());
                Ok(version)
            }
            None => {
                state.next_version_id += 1;
                version.id = state.next_version_id;
                state.versions.insert(version.id, version.clone());
                Ok(version)
            }
        }
    }

    fn list_versions(&self, service_name: Option<&str>) -> Result<Vec<Version>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let service_id = match service_name {
            Some(name) => match state.service_ids_by_name.get(name) {
                Some(&id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        Ok(state
            .versions
            .values()
            .filter(|v| service_id.map(|id| v.service_id == id).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn get_version(&self, service_name: &str, version_label: &str) -> Result<Version, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let service_id = *state
            .service_ids_by_name
            .get(service_name)
            .ok_or_else(|| StoreError::UnknownService(service_name.to_string()))?;
        state
            .versions
            .values()
            .find(|v| v.service_id == service_id && v.version_label == version_label)
            .cloned()
            .ok_or_else(|| StoreError::UnknownVersion {
                service: service_name.to_string(),
                version: version_label.to_string(),
            })
    }

    fn set_version_state(&self, version_id: u64, new_state: VersionState) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| StoreError::UnknownInstance(version_id.to_string()))?;
        version.state = new_state;
        Ok(())
    }

    fn set_version_weight(&self, version_id: u64, weight: u32) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| StoreError::UnknownInstance(version_id.to_string()))?;
        version.route_weight = weight;
        Ok(())
    }

    fn set_version_replicas(&self, version_id: u64, replicas: u32) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| StoreError::UnknownInstance(version_id.to_string()))?;
        version.desired_replicas = replicas;
        Ok(())
    }

    fn list_instances(&self, version_id: u64) -> Result<Vec<Instance>, StoreError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .instances
            .values()
            .filter(|i| i.version_id == version_id)
            .cloned()
            .collect())
    }

    fn insert_instance(&self, mut instance: Instance) -> Result<Instance, StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.next_instance_id += 1;
        instance.id = state.next_instance_id;
        state.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    fn update_instance_health(
        &self,
        instance_id: u64,
        status: InstanceStatus,
        latency_ms: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let instance = state
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| StoreError::UnknownInstance(instance_id.to_string()))?;
        instance.status = status;
        instance.last_health_ts = Some(Utc::now());
        instance.last_latency_ms = latency_ms;
        Ok(())
    }

    fn bump_restart_count(&self, instance_id: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let instance = state
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| StoreError::UnknownInstance(instance_id.to_string()))?;
        instance.restart_count += 1;
        Ok(())
    }

    fn delete_instance(&self, instance_id: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state
            .instances
            .remove(&instance_id)
            .ok_or_else(|| StoreError::UnknownInstance(instance_id.to_string()))?;
        Ok(())
    }

    fn log_event(&self, level: EventLevel, service: Option<&str>, version: Option<&str>, message: &str) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.events.push(Event {
            ts: Utc::now(),
            level,
            service: service.map(str::to_string),
            version: version.map(str::to_string),
            message: message.to_string(),
        });
    }

    fn latest_events(&self, limit: usize) -> Vec<Event> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut events = state.events.clone();
        events.sort_by(|a, b| b.ts.cmp(&a.ts));
        events.truncate(limit);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_version(service_id: u64, label: &str) -> Version {
        Version {
            id: 0,
            service_id,
            version_label: label.to_string(),
            image: "repo/img:tag".to_string(),
            internal_port: 8080,
            health_path: "/health".to_string(),
            desired_replicas: 1,
            route_weight: 100,
            state: VersionState::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn get_or_create_service_is_idempotent_by_name() {
        let store = MemoryStore::new();
        let a = store.get_or_create_service("checkout").unwrap();
        let b = store.get_or_create_service("checkout").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn upsert_version_inserts_then_updates_in_place() {
        let store = MemoryStore::new();
        let svc = store.get_or_create_service("checkout").unwrap();
        let inserted = store.upsert_version(sample_version(svc.id, "v1")).unwrap();
        assert_eq!(inserted.route_weight, 100);

        let mut updated = sample_version(svc.id, "v1");
        updated.route_weight = 50;
        let result = store.upsert_version(updated).unwrap();
        assert_eq!(result.id, inserted.id);
        assert_eq!(result.route_weight, 50);

        assert_eq!(store.list_versions(Some("checkout")).unwrap().len(), 1);
    }

    #[test]
    fn get_version_unknown_service_errors() {
        let store = MemoryStore::new();
        let err = store.get_version("ghost", "v1").unwrap_err();
        assert!(matches!(err, StoreError::UnknownService(_)));
    }

    #[test]
    fn instance_lifecycle() {
        let store = MemoryStore::new();
        let svc = store.get_or_create_service("checkout").unwrap();
        let version = store.upsert_version(sample_version(svc.id, "v1")).unwrap();

        let instance = store
            .insert_instance(Instance {
                id: 0,
                version_id: version.id,
                container_id: "c1".to_string(),
                container_name: "dsr-checkout-v1-abc".to_string(),
                status: InstanceStatus::Starting,
                last_health_ts: None,
                last_latency_ms: None,
                restart_count: 0,
                created_at: Utc::now(),
            })
            .unwrap();

        store
            .update_instance_health(instance.id, InstanceStatus::Up, Some(3.2))
            .unwrap();
        store.bump_restart_count(instance.id).unwrap();

        let fetched = store.list_instances(version.id).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].status, InstanceStatus::Up);
        assert_eq!(fetched[0].restart_count, 1);

        store.delete_instance(instance.id).unwrap();
        assert!(store.list_instances(version.id).unwrap().is_empty());
    }

    #[test]
    fn latest_events_orders_newest_first_and_truncates() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.log_event(EventLevel::Info, Some("checkout"), None, &format!("event {i}"));
        }
        let events = store.latest_events(3);
        assert_eq!(events.len(), 3);
    }
}
