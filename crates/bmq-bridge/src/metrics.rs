//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Prometheus counters for event dispatch."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
use prometheus::{IntCounter, Opts, Registry};

/// Prometheus metric handles for dispatched events.
#[derive(Debug, Clone)]
pub struct BridgeMetrics {
    pushed: IntCounter,
    acks: IntCounter,
    nacks_suppressed: IntCounter,
    decode_errors: IntCounter,
    callback_failures: IntCounter,
}

impl BridgeMetrics {
    /// Register bridge metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            pushed: counter(
                "bmq_bridge_messages_pushed_total",
                "Pushed messages delivered to the host",
            )?,
            acks: counter(
                "bmq_bridge_acks_delivered_total",
                "Acknowledgements delivered to the host",
            )?,
            nacks_suppressed: counter(
                "bmq_bridge_nacks_suppressed_total",
                "Negative acknowledgements without a correlation handle",
            )?,
            decode_errors: counter(
                "bmq_bridge_property_decode_errors_total",
                "Message properties skipped while decoding",
            )?,
            callback_failures: counter(
                "bmq_bridge_callback_failures_total",
                "Host callbacks that returned an error or panicked",
            )?,
        })
    }

    pub fn observe_pushed(&self, count: usize) {
        self.pushed.inc_by(count as u64);
    }

    pub fn observe_ack(&self) {
        self.acks.inc();
    }

    pub fn observe_nack_suppressed(&self) {
        self.nacks_suppressed.inc();
    }

    pub fn observe_decode_errors(&self, count: usize) {
        self.decode_errors.inc_by(count as u64);
    }

    pub fn observe_callback_failure(&self) {
        self.callback_failures.inc();
    }
}
