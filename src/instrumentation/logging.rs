//! Logging and metrics-exporter initialization for the host process.

use crate::instrumentation::metrics::register_metrics;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Error type for logging initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize Prometheus exporter: {0}")]
    PrometheusInit(String),
    #[error("Failed to set global subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Builder for the process-wide tracing subscriber and, optionally, a
/// Prometheus endpoint for the pipeline's own metrics.
///
/// # Example
///
/// ```ignore
/// let logging = LoggingBuilder::new()
///     .default_filter("info,function_telemetry=debug")
///     .prometheus_addr("0.0.0.0:9090".parse()?)
///     .build()?;
/// ```
pub struct LoggingBuilder {
    default_filter: String,
    prometheus_addr: Option<SocketAddr>,
    with_target: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    /// Create a new logging builder with default settings.
    pub fn new() -> Self {
        Self {
            default_filter: "info".to_string(),
            prometheus_addr: None,
            with_target: true,
        }
    }

    /// Filter used when `RUST_LOG` is not set (default: `"info"`).
    pub fn default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Set the address for the Prometheus metrics endpoint.
    ///
    /// Example: `"0.0.0.0:9090".parse()?` to expose metrics on port 9090.
    pub fn prometheus_addr(mut self, addr: SocketAddr) -> Self {
        self.prometheus_addr = Some(addr);
        self
    }

    /// Include the module path of each log line (default: true).
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Install the subscriber and, if configured, the Prometheus exporter.
    ///
    /// Must be called at most once per process, from within a tokio runtime
    /// when a Prometheus address is set.
    pub fn build(self) -> Result<LoggingHandle, LoggingError> {
        let prometheus_enabled = if let Some(addr) = self.prometheus_addr {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| LoggingError::PrometheusInit(e.to_string()))?;

            register_metrics();
            true
        } else {
            false
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_filter));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(self.with_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(LoggingHandle { prometheus_enabled })
    }
}

/// Handle returned by [`LoggingBuilder::build`].
#[derive(Debug)]
pub struct LoggingHandle {
    prometheus_enabled: bool,
}

impl LoggingHandle {
    /// Whether the Prometheus endpoint was started.
    pub fn prometheus_enabled(&self) -> bool {
        self.prometheus_enabled
    }
}
