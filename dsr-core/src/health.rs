//! # Health Probe
//!
//! A single HTTP GET against an instance's health path, turned into a
//! `(healthy, message, latency_ms)` triple. One [`reqwest::Client`] is
//! built once and reused across probes — connection pooling matters when
//! the reconciler is probing dozens of instances every tick.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use reqwest::redirect::Policy;
use serde_json::Value;

/// Reusable HTTP client for health probing.
///
/// Redirects are disabled: a health endpoint that redirects is not
/// answering the question being asked, and following redirects would
/// let a misconfigured target silently probe somewhere else entirely.
#[derive(Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("reqwest client with static config always builds");
        Self { client }
    }

    /// Probe `url` with a timeout of `timeout`. Always returns a result —
    /// there is no error variant, since failure to reach a backend is an
    /// expected, routine outcome the reconciler must act on, not a bug.
    ///
    /// Latency is always measured and rounded to two decimal places, even
    /// on failure, so self-heal bookkeeping has a number to log.
    pub async fn check(&self, url: &str, timeout: Duration) -> (bool, String, f64) {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.client.get(url).send()).await;
        let latency_ms = round2(start.elapsed().as_secs_f64() * 1000.0);

        let response = match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                return (false, classify_request_error(&err), latency_ms);
            }
            Err(_) => {
                return (false, "No response".to_string(), latency_ms);
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            return (false, format!("HTTP {}", response.status().as_u16()), latency_ms);
        }

        let body = match response.json::<Value>().await {
            Ok(value) => value,
            Err(_) => return (false, "Invalid JSON".to_string(), latency_ms),
        };

        match body.get("status").and_then(Value::as_str) {
            Some("healthy") => (true, "Healthy".to_string(), latency_ms),
            _ => (false, format!("Unhealthy payload: {body}"), latency_ms),
        }
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reconstructs the `"Error: <kind>: <msg>"` shape the failure reason is
/// defined as, `<kind>` standing in for the exception class name the
/// original system's `type(e).__name__` recovered: `reqwest::Error` has no
/// public class hierarchy, so the nearest equivalent is its `is_*` family
/// of predicates, and `<msg>` is the innermost source error's message
/// rather than `reqwest::Error`'s own `Display` (which already repeats the
/// kind as a prefix).
fn classify_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() || err.is_connect() {
        return "No response".to_string();
    }
    let kind = if err.is_decode() {
        "Decode"
    } else if err.is_builder() {
        "Builder"
    } else if err.is_redirect() {
        "Redirect"
    } else if err.is_body() {
        "Body"
    } else if err.is_status() {
        "Status"
    } else if err.is_request() {
        "Request"
    } else {
        "Transport"
    };
    let message = err
        .source()
        .map(|source| source.to_string())
        .unwrap_or_else(|| err.to_string());
    format!("Error: {kind}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_matches_expected_rounding() {
        assert_eq!(round2(12.345), 12.35);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(1.004), 1.0);
    }

    #[tokio::test]
    async fn probe_against_unroutable_address_reports_no_response() {
        let probe = HealthProbe::new();
        let (healthy, message, latency_ms) = probe
            .check("http://127.0.0.1:1", Duration::from_millis(200))
            .await;
        assert!(!healthy);
        assert!(message == "No response" || message.starts_with("Error:"));
        assert!(latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn probe_against_malformed_url_reports_kind_and_message() {
        let probe = HealthProbe::new();
        let (healthy, message, _) = probe
            .check("not-a-valid-url", Duration::from_millis(200))
            .await;
        assert!(!healthy);
        assert!(message.starts_with("Error: Builder: "));
    }
}
