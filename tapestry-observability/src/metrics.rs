//! Prometheus text exposition, generalized from
//! `r2e_prometheus::handler::metrics_handler`'s single process-global
//! registry: every Tapestry component (`PerformanceMonitor`, `RpcMetrics`,
//! ...) owns its own `Registry` rather than writing into one shared default,
//! so exposition here gathers from however many registries the embedder
//! wants exposed together, rather than assuming there is only one.

use prometheus::{Encoder, Registry, TextEncoder};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render every metric family across `registries` in Prometheus text
/// exposition format, in the order given.
pub fn encode_metrics(registries: &[&Registry]) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    for registry in registries {
        let families = registry.gather();
        encoder.encode(&families, &mut buffer).expect("prometheus text encoding cannot fail");
    }
    String::from_utf8(buffer).expect("prometheus text encoder always emits valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntGauge;

    #[test]
    fn encodes_a_single_registry() {
        let registry = Registry::new();
        let gauge = IntGauge::new("example_gauge", "an example").unwrap();
        registry.register(Box::new(gauge.clone())).unwrap();
        gauge.set(7);

        let text = encode_metrics(&[&registry]);
        assert!(text.contains("example_gauge 7"));
    }

    #[test]
    fn encodes_multiple_registries_into_one_document() {
        let a = Registry::new();
        let ga = IntGauge::new("a_gauge", "a").unwrap();
        a.register(Box::new(ga.clone())).unwrap();
        ga.set(1);

        let b = Registry::new();
        let gb = IntGauge::new("b_gauge", "b").unwrap();
        b.register(Box::new(gb.clone())).unwrap();
        gb.set(2);

        let text = encode_metrics(&[&a, &b]);
        assert!(text.contains("a_gauge 1"));
        assert!(text.contains("b_gauge 2"));
    }

    #[test]
    fn empty_registry_list_yields_empty_document() {
        assert_eq!(encode_metrics(&[]), "");
    }
}
