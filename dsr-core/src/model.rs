//! # Data Model
//!
//! Persistent and runtime-only entity types for the reconciler.
//!
//! ## Ownership
//!
//! The store (§4.6, represented here by [`crate::store::Store`]) owns the
//! persistent entities: [`Service`], [`Version`], [`Instance`], [`Event`].
//! The runtime registry ([`crate::registry::RuntimeRegistry`]) owns the
//! transient ones: [`RouteTarget`], [`RolloutStatus`]. There are no cycles
//! between them.
//!
//! ## Validation
//!
//! [`validate_service_name`], [`validate_version_label`], and
//! [`validate_health_path`] enforce the exact patterns from the original
//! system this was distilled from (`docker_ops.py`), compiled once via
//! `std::sync::LazyLock`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::CoreError;

static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,62}$").expect("service name regex is valid"));

static VERSION_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").expect("version label regex is valid")
});

/// Reject a service name that isn't DNS-safe per spec.
pub fn validate_service_name(name: &str) -> Result<(), CoreError> {
    if SERVICE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "invalid service name '{name}': must match ^[a-z][a-z0-9-]{{0,62}}$"
        )))
    }
}

/// Reject a version label that doesn't match the allowed character set.
pub fn validate_version_label(label: &str) -> Result<(), CoreError> {
    if VERSION_LABEL_RE.is_match(label) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "invalid version label '{label}': must match ^[a-z0-9][a-z0-9._-]{{0,63}}$"
        )))
    }
}

/// Reject a health path that is not a simple absolute path.
///
/// Disallows a scheme (`://`) and parent traversal (`..`) so the
/// reconciler can never be turned into an arbitrary-URL SSRF proxy.
pub fn validate_health_path(path: &str) -> Result<(), CoreError> {
    if !path.starts_with('/') {
        return Err(CoreError::Validation(
            "health_path must start with '/'".to_string(),
        ));
    }
    if path.contains("://") || path.contains("..") {
        return Err(CoreError::Validation(
            "health_path must be a simple absolute path (no scheme, no '..')".to_string(),
        ));
    }
    Ok(())
}

/// A logical name identifying a set of versions. Identity is immutable
/// once created; created implicitly on first version registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: u64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle state of a [`Version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// Serving traffic, eligible for routing and for being rolled out from.
    Active,
    /// A rollout's target version; may be serving a partial traffic share.
    Candidate,
    /// No longer serving traffic; scaled to zero replicas.
    Retired,
}

/// One deployable revision of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: u64,
    pub service_id: u64,
    pub version_label: String,
    pub image: String,
    pub internal_port: u16,
    pub health_path: String,
    pub desired_replicas: u32,
    pub route_weight: u32,
    pub state: VersionState,
    pub created_at: DateTime<Utc>,
}

impl Version {
    /// A retired version must carry zero weight and zero replicas.
    pub fn is_retired_correctly(&self) -> bool {
        self.state != VersionState::Retired || (self.route_weight == 0 && self.desired_replicas == 0)
    }
}

/// Running status of an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Just created; no probe result yet.
    Starting,
    /// Most recent probe succeeded.
    Up,
    /// Most recent probe failed.
    Down,
}

/// A running container of a [`Version`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub version_id: u64,
    pub container_id: String,
    pub container_name: String,
    pub status: InstanceStatus,
    pub last_health_ts: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<f64>,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Severity of a logged [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub service: Option<String>,
    pub version: Option<String>,
    pub message: String,
}

/// Runtime-only routable destination, rebuilt from scratch on every
/// reconciler tick from `up` instances of versions in
/// `{active, candidate}` with nonzero weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub service: String,
    pub version: String,
    pub base_url: String,
    pub weight: u32,
    pub last_latency_ms: Option<f64>,
}

/// Tagged state of a [`RolloutStatus`]. Represented as a closed variant
/// rather than a string at the type level; stringified only at the API
/// boundary (out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    Running,
    Paused,
    Done,
    Failed,
}

impl RolloutState {
    /// `done` and `failed` are terminal: `continue_rollout` on either is a no-op.
    pub fn is_terminal(self) -> bool {
        matches!(self, RolloutState::Done | RolloutState::Failed)
    }
}

/// Runtime-only status of an in-flight or completed rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub id: String,
    pub service: String,
    pub to_version: String,
    pub state: RolloutState,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_accepts_dns_safe_names() {
        assert!(validate_service_name("checkout").is_ok());
        assert!(validate_service_name("checkout-v2").is_ok());
        assert!(validate_service_name("a").is_ok());
    }

    #[test]
    fn service_name_rejects_bad_names() {
        assert!(validate_service_name("Checkout").is_err());
        assert!(validate_service_name("1checkout").is_err());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn version_label_accepts_common_forms() {
        assert!(validate_version_label("v1").is_ok());
        assert!(validate_version_label("1.2.3").is_ok());
        assert!(validate_version_label("v1_rc-1").is_ok());
    }

    #[test]
    fn version_label_rejects_leading_dot_or_uppercase() {
        assert!(validate_version_label(".v1").is_err());
        assert!(validate_version_label("V1").is_err());
    }

    #[test]
    fn health_path_requires_leading_slash() {
        assert!(validate_health_path("health").is_err());
        assert!(validate_health_path("/health").is_ok());
    }

    #[test]
    fn health_path_rejects_scheme_and_traversal() {
        assert!(validate_health_path("http://evil.example/health").is_err());
        assert!(validate_health_path("/../secret").is_err());
    }

    #[test]
    fn retired_invariant_holds_only_when_zeroed() {
        let base = Version {
            id: 1,
            service_id: 1,
            version_label: "v1".into(),
            image: "img".into(),
            internal_port: 8080,
            health_path: "/health".into(),
            desired_replicas: 0,
            route_weight: 0,
            state: VersionState::Retired,
            created_at: Utc::now(),
        };
        assert!(base.is_retired_correctly());

        let mut bad = base.clone();
        bad.route_weight = 10;
        assert!(!bad.is_retired_correctly());
    }

    #[test]
    fn rollout_terminal_states() {
        assert!(RolloutState::Done.is_terminal());
        assert!(RolloutState::Failed.is_terminal());
        assert!(!RolloutState::Running.is_terminal());
        assert!(!RolloutState::Paused.is_terminal());
    }
}
