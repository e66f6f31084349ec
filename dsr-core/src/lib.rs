//! # dsr-core
//!
//! Control plane for a single-node service reconciler: a background loop
//! that aligns running container counts to desired replica counts,
//! probes instance health and self-heals failing ones, rebuilds an
//! in-memory routing table from the result, and coordinates canary/
//! blue-green rollouts across versions of a service.
//!
//! ## Layout
//!
//! - [`model`] — the data model: [`model::Service`], [`model::Version`],
//!   [`model::Instance`], [`model::Event`], plus the runtime-only
//!   [`model::RouteTarget`] and [`model::RolloutStatus`].
//! - [`error`] — [`error::CoreError`] and the two boundary error types it
//!   wraps, [`error::StoreError`] and [`error::EngineError`].
//! - [`store`] — the persisted-state boundary ([`store::Store`]) and an
//!   in-memory fake ([`store::MemoryStore`]).
//! - [`engine`] — the container-engine boundary ([`engine::Engine`]) and
//!   an in-memory fake ([`engine::FakeEngine`]).
//! - [`registry`] — [`registry::RuntimeRegistry`], the single piece of
//!   shared mutable state: routing tables, health bookkeeping,
//!   round-robin cursors, rollout statuses.
//! - [`health`] — [`health::HealthProbe`], the HTTP health check.
//! - [`selector`] — [`selector::select_backend`], weighted + round-robin
//!   backend selection.
//! - [`reconciler`] — [`reconciler::Reconciler`], the tick loop tying
//!   store, engine, and registry together.
//! - [`rollout`] — [`rollout::RolloutCoordinator`], the canary/blue-green
//!   state machine.
//! - [`alert`] — [`alert::AlertSink`], the hook point for external
//!   alerting on health transitions.
//! - [`config`] — [`config::DsrConfig`], environment-driven process
//!   configuration.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dsr_core::alert::NullAlertSink;
//! use dsr_core::config::DsrConfig;
//! use dsr_core::engine::FakeEngine;
//! use dsr_core::reconciler::Reconciler;
//! use dsr_core::registry::RuntimeRegistry;
//! use dsr_core::store::MemoryStore;
//!
//! # async fn run() -> Result<(), dsr_core::error::CoreError> {
//! let store = Arc::new(MemoryStore::new());
//! let engine = Arc::new(FakeEngine::new());
//! let registry = Arc::new(RuntimeRegistry::new());
//! let reconciler = Reconciler::new(store, engine, registry, Arc::new(NullAlertSink), DsrConfig::default());
//! reconciler.tick().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;
pub mod reconciler;
pub mod registry;
pub mod rollout;
pub mod selector;
pub mod store;

pub use config::DsrConfig;
pub use error::{CoreError, EngineError, StoreError};
pub use reconciler::Reconciler;
pub use registry::RuntimeRegistry;
pub use rollout::{RolloutCoordinator, StartRollout};
pub use selector::select_backend;
