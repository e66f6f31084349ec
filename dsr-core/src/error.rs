//! # Error Handling Module
//!
//! Error types for the desired-state reconciler's control plane.
//!
//! ## Overview
//!
//! Errors are split into three tiers, mirroring the boundary each one
//! guards:
//!
//! - [`StoreError`] — failures from the persisted-state boundary
//!   (services/versions/instances/events). A production implementation
//!   wires this to a relational store; [`crate::store::MemoryStore`] wires
//!   it to an in-memory fake for tests.
//! - [`EngineError`] — failures from the container-engine boundary
//!   (create/remove/inspect/network). [`crate::engine::FakeEngine`] wires
//!   it to an in-memory fake.
//! - [`CoreError`] — the control plane's own errors (validation, no
//!   healthy backends, unknown rollout), plus the two boundary errors
//!   above via `#[from]` conversion, so a caller can propagate any of them
//!   with a single `?`.
//!
//! Internal layers never panic on recoverable conditions; `unwrap()` is
//! reserved for invariants already enforced earlier in the same function
//! (e.g. a regex compiled from a constant string).

use thiserror::Error;

/// Errors surfaced by a [`crate::store::Store`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested service does not exist.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The requested (service, version) pair does not exist.
    #[error("unknown version: {service}/{version}")]
    UnknownVersion { service: String, version: String },

    /// The requested instance does not exist.
    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    /// A uniqueness constraint was violated, e.g. duplicate (service, version).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Underlying storage medium failed (I/O, serialization, etc).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by a [`crate::engine::Engine`] implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The container engine (daemon, API) could not be reached.
    #[error("engine unavailable")]
    Unavailable,

    /// The requested container does not exist.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The engine rejected the operation for a reason other than
    /// unavailability or not-found (e.g. image pull failure).
    #[error("engine operation failed: {0}")]
    Operation(String),
}

/// Top-level error type for the control plane.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A service/version/health-path/weight/replica value failed validation
    /// at the API boundary. No state was mutated.
    #[error("validation error: {0}")]
    Validation(String),

    /// The container engine is unavailable; replica alignment and
    /// self-heal degrade to no-ops for this tick, but the error is not
    /// fatal to the reconciler loop.
    #[error("container engine unavailable")]
    EngineUnavailable,

    /// No `up` instance with nonzero `route_weight` exists for the
    /// requested service.
    #[error("no healthy backends for service '{service}'")]
    NoHealthyBackends { service: String },

    /// A rollout id was not found in the runtime registry.
    #[error("unknown rollout: {0}")]
    UnknownRollout(String),

    /// Propagated from the persisted-state boundary.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Propagated from the container-engine boundary.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_converts_into_core_error() {
        let err: CoreError = EngineError::Unavailable.into();
        assert!(matches!(err, CoreError::Engine(EngineError::Unavailable)));
    }

    #[test]
    fn store_error_converts_into_core_error() {
        let err: CoreError = StoreError::UnknownService("svc".into()).into();
        assert_eq!(err.to_string(), "unknown service: svc");
    }

    #[test]
    fn no_healthy_backends_message_includes_service_name() {
        let err = CoreError::NoHealthyBackends {
            service: "checkout".to_string(),
        };
        assert_eq!(err.to_string(), "no healthy backends for service 'checkout'");
    }
}
