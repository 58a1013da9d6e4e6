use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};
use crate::live::{DEFAULT_LIVE_CAPACITY, DEFAULT_LIVE_WINDOW};
use crate::processor::KindFilterMode;

pub const APP_VERSION_VAR: &str = "APP_VERSION";
pub const APP_ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";
pub const APP_CLOUD_ROLE_VAR: &str = "APP_CLOUD_ROLE";
pub const CONNECTION_STRING_VAR: &str = "APP_INSIGHTS_CONNECTION_STRING";
pub const SAMPLING_PERCENTAGE_VAR: &str = "TELEMETRY_SAMPLING_PERCENTAGE";
pub const DEPENDENCY_SUCCESS_RULE_VAR: &str = "TELEMETRY_DEPENDENCY_SUCCESS_RULE";
pub const KIND_FILTER_VAR: &str = "TELEMETRY_KIND_FILTER";
pub const LIVE_METRICS_VAR: &str = "TELEMETRY_LIVE_METRICS";

pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to assemble a [`TelemetryClient`](crate::TelemetryClient).
///
/// Usually read from the process environment with [`PipelineConfig::from_env`].
/// Empty variables count as unset.
///
/// # Example
///
/// ```
/// use function_telemetry::PipelineConfig;
///
/// let config = PipelineConfig::from_lookup(|key| match key {
///     "APP_ENVIRONMENT" => Some("dev".to_string()),
///     "TELEMETRY_SAMPLING_PERCENTAGE" => Some("25".to_string()),
///     _ => None,
/// })
/// .unwrap();
/// assert_eq!(config.environment, "dev");
/// assert_eq!(config.sampling_percentage, 25.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Stamped on items without a component version (default: crate version)
    pub app_version: String,
    /// Deployment tag: `dev`, `test`, or anything else for no tag (default: "")
    pub environment: String,
    /// Role name stamped on items without one
    pub cloud_role: Option<String>,
    /// Connection string of the monitoring resource; `None` exports nowhere
    pub connection_string: Option<String>,
    /// Percentage of operations kept by the sampling stage (default: 100)
    pub sampling_percentage: f64,
    /// Derive dependency success from duration (default: false)
    pub dependency_success_rule: bool,
    /// Which kinds reach export (default: traces only)
    pub kind_filter: KindFilterMode,
    /// Keep a live-metrics window (default: true)
    pub live_metrics: bool,
    /// Maximum samples in the live-metrics window (default: 1024)
    pub live_capacity: usize,
    /// Maximum sample age in the live-metrics window (default: 60s)
    pub live_window: Duration,
    /// Bound of the export queue (default: 2048)
    pub queue_capacity: usize,
    /// Items per sink batch (default: 64)
    pub batch_size: usize,
    /// How often a partial batch is sent (default: 1s)
    pub export_interval: Duration,
    /// Used by [`TelemetryClient::flush_default`](crate::TelemetryClient::flush_default)
    /// and when the client is shut down (default: 5s)
    pub flush_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: String::new(),
            cloud_role: None,
            connection_string: None,
            sampling_percentage: 100.0,
            dependency_success_rule: false,
            kind_filter: KindFilterMode::default(),
            live_metrics: true,
            live_capacity: DEFAULT_LIVE_CAPACITY,
            live_window: DEFAULT_LIVE_WINDOW,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> TelemetryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to defaults for
    /// anything it does not return.
    pub fn from_lookup<F>(lookup: F) -> TelemetryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(version) = get(APP_VERSION_VAR) {
            config.app_version = version;
        }
        if let Some(environment) = get(APP_ENVIRONMENT_VAR) {
            config.environment = environment;
        }
        config.cloud_role = get(APP_CLOUD_ROLE_VAR);
        config.connection_string = get(CONNECTION_STRING_VAR);

        if let Some(value) = get(SAMPLING_PERCENTAGE_VAR) {
            config.sampling_percentage = parse_percentage(SAMPLING_PERCENTAGE_VAR, &value)?;
        }
        if let Some(value) = get(DEPENDENCY_SUCCESS_RULE_VAR) {
            config.dependency_success_rule = parse_bool(DEPENDENCY_SUCCESS_RULE_VAR, &value)?;
        }
        if let Some(value) = get(KIND_FILTER_VAR) {
            config.kind_filter =
                KindFilterMode::parse(&value).map_err(|_| invalid(KIND_FILTER_VAR, &value))?;
        }
        if let Some(value) = get(LIVE_METRICS_VAR) {
            config.live_metrics = parse_bool(LIVE_METRICS_VAR, &value)?;
        }

        Ok(config)
    }
}

fn parse_percentage(key: &str, value: &str) -> TelemetryResult<f64> {
    match value.trim().trim_end_matches('%').parse::<f64>() {
        Ok(pct) if pct.is_finite() => Ok(pct),
        _ => Err(invalid(key, value)),
    }
}

fn parse_bool(key: &str, value: &str) -> TelemetryResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> TelemetryError {
    TelemetryError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}
