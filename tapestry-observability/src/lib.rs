//! Ambient observability glue: one-time `tracing` subscriber setup, and
//! Prometheus text exposition across however many component-local
//! registries the embedder has built.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::{encode_metrics, PROMETHEUS_CONTENT_TYPE};
pub use tracing_setup::{init_tracing, LogFormat};
