//! Process-wide performance quotas and timing.
//!
//! Owns its own `prometheus::Registry` rather than the process default, the
//! way a Tower metrics layer in this codebase builds a scoped registry per
//! server instance — so constructing more than one `PerformanceMonitor` (as
//! tests do) never panics on duplicate metric registration.

use std::fmt;
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntGauge, Registry};

pub const MAX_EXTENSIONS: usize = 200;
pub const MAX_DEPENDENCY_DEPTH: usize = 50;
pub const MAX_TEMPLATE_SIZE_BYTES: usize = 100 * 1024;
pub const MAX_TEMPLATE_NODES: usize = 1000;
pub const MAX_ACTIVATION_TIME_PER_EXT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerformanceLimitError {
    TooManyExtensions { count: usize },
    DependencyTooDeep { depth: usize },
    TemplateTooLarge { bytes: usize },
    TooManyTemplateNodes { nodes: usize },
    ActivationTimeout { elapsed: Duration },
}

impl fmt::Display for PerformanceLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceLimitError::TooManyExtensions { count } => {
                write!(f, "{count} extensions exceeds MAX_EXTENSIONS={MAX_EXTENSIONS}")
            }
            PerformanceLimitError::DependencyTooDeep { depth } => {
                write!(f, "dependency depth {depth} exceeds MAX_DEPENDENCY_DEPTH={MAX_DEPENDENCY_DEPTH}")
            }
            PerformanceLimitError::TemplateTooLarge { bytes } => write!(
                f,
                "template size {bytes} bytes exceeds MAX_TEMPLATE_SIZE={MAX_TEMPLATE_SIZE_BYTES}"
            ),
            PerformanceLimitError::TooManyTemplateNodes { nodes } => write!(
                f,
                "template node count {nodes} exceeds MAX_TEMPLATE_NODES={MAX_TEMPLATE_NODES}"
            ),
            PerformanceLimitError::ActivationTimeout { elapsed } => write!(
                f,
                "extension activation took {elapsed:?}, exceeds MAX_ACTIVATION_TIME_PER_EXT={MAX_ACTIVATION_TIME_PER_EXT:?}"
            ),
        }
    }
}

impl std::error::Error for PerformanceLimitError {}

pub struct PerformanceMonitor {
    registry: Registry,
    extension_count: IntGauge,
    dependency_depth: IntGauge,
    activation_duration: Histogram,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        let registry = Registry::new();
        let extension_count = IntGauge::new("tapestry_extension_count", "number of discovered extensions")
            .expect("metric definition is valid");
        let dependency_depth = IntGauge::new("tapestry_max_dependency_depth", "deepest extension dependency chain")
            .expect("metric definition is valid");
        let activation_duration = Histogram::with_opts(HistogramOpts::new(
            "tapestry_extension_activation_seconds",
            "per-extension activation duration",
        ))
        .expect("metric definition is valid");

        registry.register(Box::new(extension_count.clone())).expect("metric registration");
        registry.register(Box::new(dependency_depth.clone())).expect("metric registration");
        registry.register(Box::new(activation_duration.clone())).expect("metric registration");

        Self {
            registry,
            extension_count,
            dependency_depth,
            activation_duration,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn check_extension_count(&self, count: usize) -> Result<(), PerformanceLimitError> {
        self.extension_count.set(count as i64);
        if count > MAX_EXTENSIONS {
            return Err(PerformanceLimitError::TooManyExtensions { count });
        }
        Ok(())
    }

    pub fn check_dependency_depth(&self, depth: usize) -> Result<(), PerformanceLimitError> {
        self.dependency_depth.set(depth as i64);
        if depth > MAX_DEPENDENCY_DEPTH {
            return Err(PerformanceLimitError::DependencyTooDeep { depth });
        }
        Ok(())
    }

    pub fn check_template_size(&self, bytes: usize) -> Result<(), PerformanceLimitError> {
        if bytes > MAX_TEMPLATE_SIZE_BYTES {
            return Err(PerformanceLimitError::TemplateTooLarge { bytes });
        }
        Ok(())
    }

    pub fn check_template_nodes(&self, nodes: usize) -> Result<(), PerformanceLimitError> {
        if nodes > MAX_TEMPLATE_NODES {
            return Err(PerformanceLimitError::TooManyTemplateNodes { nodes });
        }
        Ok(())
    }

    /// Record an extension's activation time. Always recorded for
    /// observability, but returns an error if it exceeded the quota so the
    /// caller can fail the extension.
    pub fn record_activation(&self, elapsed: Duration) -> Result<(), PerformanceLimitError> {
        self.activation_duration.observe(elapsed.as_secs_f64());
        if elapsed > MAX_ACTIVATION_TIME_PER_EXT {
            return Err(PerformanceLimitError::ActivationTimeout { elapsed });
        }
        Ok(())
    }
}
