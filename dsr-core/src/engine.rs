//! # Engine
//!
//! The container-engine boundary: create/remove/inspect/list operations
//! for the instances that back a version. A production deployment wires
//! this to a container runtime's API; [`FakeEngine`] is an in-memory fake
//! that simulates container lifecycle for tests and for running the
//! agent without a real engine available.
//!
//! All operations are synchronous, mirroring the Store boundary — neither
//! interface assumes its backend is itself async, and both are called
//! from the reconciler's blocking-safe tick, never held across an await.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use crate::error::EngineError;

/// A container reference handed back by the engine on creation or listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// The container-engine boundary.
pub trait Engine: Send + Sync {
    /// Whether the engine can currently be reached. The reconciler treats
    /// `false` as a degrade-to-no-op signal for this tick rather than a
    /// fatal error.
    fn available(&self) -> bool;

    fn ensure_network(&self, network: &str) -> Result<(), EngineError>;

    /// Create and start one container for `service`/`version`, publishing
    /// `internal_port`. Returns the new container's reference; the
    /// container name is engine-chosen (deterministic prefix plus a
    /// random suffix) so repeated calls never collide.
    fn create_and_start(
        &self,
        service: &str,
        version: &str,
        image: &str,
        internal_port: u16,
        network: &str,
    ) -> Result<ContainerRef, EngineError>;

    /// Stop and remove a container. Removing an already-gone container is
    /// not an error — the engine may have already reaped it.
    fn remove(&self, container_id: &str) -> Result<(), EngineError>;

    fn list(&self, service: &str, version: &str) -> Result<Vec<ContainerRef>, EngineError>;

    fn is_running(&self, container_id: &str) -> Result<bool, EngineError>;

    /// The base URL the reconciler should use to reach `container_name`'s
    /// published port from inside the engine's network.
    fn http_base(&self, container_name: &str, internal_port: u16) -> String {
        format!("http://{container_name}:{internal_port}")
    }
}

struct FakeContainer {
    container_ref: ContainerRef,
    service: String,
    version: String,
    running: bool,
}

/// In-memory [`Engine`] fake. Always reports `available() == true`;
/// tests that need to exercise the degrade-to-no-op path construct one
/// with [`FakeEngine::unavailable`] instead.
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    available: bool,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            available: true,
        }
    }

    /// An engine fake that reports itself as unreachable, for exercising
    /// the reconciler's degrade-to-no-op path.
    pub fn unavailable() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            available: false,
        }
    }
}

impl Engine for FakeEngine {
    fn available(&self) -> bool {
        self.available
    }

    fn ensure_network(&self, _network: &str) -> Result<(), EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        Ok(())
    }

    fn create_and_start(
        &self,
        service: &str,
        version: &str,
        _image: &str,
        _internal_port: u16,
        _network: &str,
    ) -> Result<ContainerRef, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        let suffix: u32 = rand::thread_rng().gen_range(0..0xffffff);
        let name = format!("dsr-{service}-{version}-{suffix:06x}");
        let id = format!("fake-{suffix:06x}-{}", self.containers.lock().expect("engine mutex poisoned").len());
        let container_ref = ContainerRef {
            id: id.clone(),
            name,
        };
        self.containers.lock().expect("engine mutex poisoned").insert(
            id,
            FakeContainer {
                container_ref: container_ref.clone(),
                service: service.to_string(),
                version: version.to_string(),
                running: true,
            },
        );
        Ok(container_ref)
    }

    fn remove(&self, container_id: &str) -> Result<(), EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        self.containers.lock().expect("engine mutex poisoned").remove(container_id);
        Ok(())
    }

    fn list(&self, service: &str, version: &str) -> Result<Vec<ContainerRef>, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        let containers = self.containers.lock().expect("engine mutex poisoned");
        Ok(containers
            .values()
            .filter(|c| c.service == service && c.version == version && c.running)
            .map(|c| c.container_ref.clone())
            .collect())
    }

    fn is_running(&self, container_id: &str) -> Result<bool, EngineError> {
        if !self.available {
            return Err(EngineError::Unavailable);
        }
        let containers = self.containers.lock().expect("engine mutex poisoned");
        containers
            .get(container_id)
            .map(|c| c.running)
            .ok_or_else(|| EngineError::NotFound(container_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_list_round_trip() {
        let engine = FakeEngine::new();
        engine.ensure_network("dsr").unwrap();
        let created = engine
            .create_and_start("checkout", "v1", "repo/img:tag", 8080, "dsr")
            .unwrap();
        let listed = engine.list("checkout", "v1").unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[test]
    fn remove_drops_from_listing() {
        let engine = FakeEngine::new();
        let created = engine
            .create_and_start("checkout", "v1", "repo/img:tag", 8080, "dsr")
            .unwrap();
        engine.remove(&created.id).unwrap();
        assert!(engine.list("checkout", "v1").unwrap().is_empty());
    }

    #[test]
    fn remove_of_unknown_container_is_not_an_error() {
        let engine = FakeEngine::new();
        assert!(engine.remove("does-not-exist").is_ok());
    }

    #[test]
    fn unavailable_engine_rejects_every_operation() {
        let engine = FakeEngine::unavailable();
        assert!(!engine.available());
        assert!(matches!(
            engine.ensure_network("dsr"),
            Err(EngineError::Unavailable)
        ));
        assert!(matches!(
            engine.create_and_start("checkout", "v1", "img", 8080, "dsr"),
            Err(EngineError::Unavailable)
        ));
    }

    #[test]
    fn http_base_formats_engine_internal_url() {
        let engine = FakeEngine::new();
        assert_eq!(
            engine.http_base("dsr-checkout-v1-abc", 8080),
            "http://dsr-checkout-v1-abc:8080"
        );
    }
}
