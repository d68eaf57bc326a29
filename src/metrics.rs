//! Shared Prometheus metric vectors (§J / §6 Metrics table).
//!
//! Each `Metrics` owns a private `Registry` rather than registering into
//! Prometheus's process-global default registry: a process that builds more
//! than one `Metrics` (every test binary does) would otherwise hit
//! `AlreadyReg` on the second construction.

use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_gauge_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, CounterVec, Gauge, GaugeVec, IntCounter, IntGauge, Registry,
};

pub struct Metrics {
    pub registry: Registry,
    pub requests_total: CounterVec,
    pub reloads_total: IntCounter,
    pub last_update_epoch: IntGauge,
    pub cert_expiry_days: GaugeVec,
    pub cert_expiry_last_update_epoch: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        Metrics {
            requests_total: register_counter_vec_with_registry!(
                "http_server_requests_total",
                "Total number of http requests",
                &["domain", "code", "method", "type"],
                registry
            )
            .expect("metric registration is infallible against a fresh registry"),
            reloads_total: register_int_counter_with_registry!(
                "shelob_reloads_total",
                "Number of times the service definitions have been reloaded",
                registry
            )
            .expect("metric registration is infallible against a fresh registry"),
            last_update_epoch: register_int_gauge_with_registry!(
                "shelob_last_update_epoch",
                "Unix timestamp of the last successful backend reload",
                registry
            )
            .expect("metric registration is infallible against a fresh registry"),
            cert_expiry_days: register_gauge_vec_with_registry!(
                "shelob_cert_expiry_days",
                "Days until the certificate for a domain expires; -1 if the cert failed to parse",
                &["domain"],
                registry
            )
            .expect("metric registration is infallible against a fresh registry"),
            cert_expiry_last_update_epoch: register_gauge_with_registry!(
                "shelob_cert_expiry_last_update_epoch",
                "Unix timestamp of the last successful certificate reload",
                registry
            )
            .expect("metric registration is infallible against a fresh registry"),
            registry,
        }
    }

    pub fn record_request(&self, domain: &str, code: u16, method: &str, kind: &str) {
        self.requests_total
            .with_label_values(&[domain, &code.to_string(), method, kind])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
