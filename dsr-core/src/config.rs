//! # Configuration
//!
//! Process-wide settings, read once from the environment at startup.
//! There is no config file layer here: every knob the reconciler needs is
//! a small, independently-overridable value, and env vars are how the
//! original system this was distilled from exposed them too.

use std::env;
use std::time::Duration;

/// Reconciler process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DsrConfig {
    /// How often the reconciler loop ticks.
    pub poll_interval: Duration,
    /// Network name passed to the engine's `ensure_network`.
    pub docker_network: String,
    /// Per-probe HTTP timeout.
    pub gateway_timeout: Duration,
    /// Consecutive health-check failures before an instance is replaced.
    pub fail_threshold: u32,
    /// Whether `base_url`s outside the engine's own network are accepted
    /// when registering a version. Defaults to `false`: allowing
    /// arbitrary external targets would let the selector be used as an
    /// open HTTP proxy.
    pub allow_external_targets: bool,
}

impl DsrConfig {
    /// Build configuration from the environment, falling back to the
    /// documented defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(env_u64("POLL_INTERVAL_S", 5)),
            docker_network: env::var("DOCKER_NETWORK").unwrap_or_else(|_| "dsr".to_string()),
            gateway_timeout: Duration::from_secs(env_u64("GATEWAY_TIMEOUT_S", 10)),
            fail_threshold: env_u64("FAIL_THRESHOLD", 2).max(1) as u32,
            allow_external_targets: env_bool("ALLOW_EXTERNAL_TARGETS", false),
        }
    }
}

impl Default for DsrConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            docker_network: "dsr".to_string(),
            gateway_timeout: Duration::from_secs(10),
            fail_threshold: 2,
            allow_external_targets: false,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let config = DsrConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.docker_network, "dsr");
        assert_eq!(config.gateway_timeout, Duration::from_secs(10));
        assert_eq!(config.fail_threshold, 2);
        assert!(!config.allow_external_targets);
    }

    #[test]
    fn fail_threshold_is_never_below_one() {
        assert_eq!(env_u64("DSR_CORE_TEST_MISSING_KEY", 0).max(1), 1);
    }

    #[test]
    fn env_bool_recognizes_common_truthy_spellings() {
        // SAFETY-equivalent note: std::env mutation in tests is inherently
        // racy across threads; this test only reads back its own key.
        std::env::set_var("DSR_CORE_TEST_BOOL_KEY", "TRUE");
        assert!(env_bool("DSR_CORE_TEST_BOOL_KEY", false));
        std::env::remove_var("DSR_CORE_TEST_BOOL_KEY");
    }
}
