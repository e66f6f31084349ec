//! # Alerting
//!
//! The hook point the reconciler calls on instance up/down transitions
//! and self-heal actions. Delivery (SMTP, pager, chat webhook — whatever
//! a deployment wires in) is out of scope for the core; [`NullAlertSink`]
//! is the default no-op so the reconciler never blocks on an unconfigured
//! sink.

use crate::model::EventLevel;

/// One alert-worthy occurrence.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub level: EventLevel,
    pub service: String,
    pub version: String,
    pub message: String,
}

/// Destination for [`AlertEvent`]s.
pub trait AlertSink: Send + Sync {
    fn notify(&self, event: AlertEvent);
}

/// No-op sink; used whenever alert delivery isn't configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn notify(&self, _event: AlertEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_without_panicking() {
        let sink = NullAlertSink;
        sink.notify(AlertEvent {
            level: EventLevel::Warn,
            service: "checkout".to_string(),
            version: "v1".to_string(),
            message: "instance down".to_string(),
        });
    }
}
