//! Prometheus metrics for the RPC layer: its own scoped `Registry`, the same
//! way [`tapestry_core::PerformanceMonitor`] avoids colliding with the
//! process default registry when more than one instance exists in tests.

use prometheus::{Histogram, HistogramOpts, IntGauge, Registry};

pub struct RpcMetrics {
    registry: Registry,
    calls_in_flight: IntGauge,
    call_duration: Histogram,
    rejected_total: IntGauge,
}

impl Default for RpcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let calls_in_flight = IntGauge::new("tapestry_rpc_calls_in_flight", "RPC calls currently being handled")
            .expect("metric definition is valid");
        let call_duration = Histogram::with_opts(HistogramOpts::new(
            "tapestry_rpc_call_duration_seconds",
            "time from rpc_call ingestion to rpc_response emission",
        ))
        .expect("metric definition is valid");
        let rejected_total = IntGauge::new("tapestry_rpc_calls_rejected_total", "calls rejected before invocation")
            .expect("metric definition is valid");

        registry.register(Box::new(calls_in_flight.clone())).expect("metric registration");
        registry.register(Box::new(call_duration.clone())).expect("metric registration");
        registry.register(Box::new(rejected_total.clone())).expect("metric registration");

        Self { registry, calls_in_flight, call_duration, rejected_total }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn call_started(&self) {
        self.calls_in_flight.inc();
    }

    pub fn call_finished(&self, elapsed: std::time::Duration) {
        self.calls_in_flight.dec();
        self.call_duration.observe(elapsed.as_secs_f64());
    }

    pub fn call_rejected(&self) {
        self.rejected_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_then_finished_leaves_gauge_at_zero() {
        let m = RpcMetrics::new();
        m.call_started();
        assert_eq!(m.calls_in_flight.get(), 1);
        m.call_finished(std::time::Duration::from_millis(5));
        assert_eq!(m.calls_in_flight.get(), 0);
    }

    #[test]
    fn rejected_increments_counter() {
        let m = RpcMetrics::new();
        m.call_rejected();
        m.call_rejected();
        assert_eq!(m.rejected_total.get(), 2);
    }

    #[test]
    fn multiple_instances_do_not_collide_on_shared_registry() {
        let _a = RpcMetrics::new();
        let _b = RpcMetrics::new();
    }
}
