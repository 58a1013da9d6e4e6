//! Metrics about the pipeline itself.
//!
//! All metrics are prefixed with `pipeline_` and use Prometheus naming
//! conventions. Without an installed recorder the calls are no-ops.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::item::TelemetryKind;

// Metric name constants
pub const ITEMS_TRACKED_TOTAL: &str = "pipeline_items_tracked_total";
pub const ITEMS_DROPPED_TOTAL: &str = "pipeline_items_dropped_total";
pub const PROCESSOR_ERRORS_TOTAL: &str = "pipeline_processor_errors_total";
pub const ITEMS_EXPORTED_TOTAL: &str = "pipeline_items_exported_total";
pub const EXPORT_FAILURES_TOTAL: &str = "pipeline_export_failures_total";

pub const QUEUE_DEPTH: &str = "pipeline_queue_depth";

pub const EXPORT_DURATION: &str = "pipeline_export_duration_seconds";
pub const FLUSH_DURATION: &str = "pipeline_flush_duration_seconds";

/// Why an item left the pipeline before reaching the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A filter stage rejected it.
    Filtered,
    /// The sampling stage rejected it.
    Sampled,
    /// A stage failed on it.
    ProcessorError,
    /// The export queue was full or closed.
    QueueFull,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Filtered => "filtered",
            DropReason::Sampled => "sampled",
            DropReason::ProcessorError => "processor_error",
            DropReason::QueueFull => "queue_full",
        }
    }
}

/// Register all metric descriptions. Called once during logging setup.
pub fn register_metrics() {
    // Counters
    describe_counter!(
        ITEMS_TRACKED_TOTAL,
        "Total number of telemetry items submitted to the client"
    );
    describe_counter!(
        ITEMS_DROPPED_TOTAL,
        "Total number of telemetry items dropped before export"
    );
    describe_counter!(
        PROCESSOR_ERRORS_TOTAL,
        "Total number of processor stage failures"
    );
    describe_counter!(
        ITEMS_EXPORTED_TOTAL,
        "Total number of telemetry items handed to the sink"
    );
    describe_counter!(EXPORT_FAILURES_TOTAL, "Total number of failed sink batches");

    // Gauges
    describe_gauge!(QUEUE_DEPTH, "Number of items waiting in the export queue");

    // Histograms
    describe_histogram!(EXPORT_DURATION, "Duration of a sink batch send in seconds");
    describe_histogram!(FLUSH_DURATION, "Duration of a client flush in seconds");
}

/// Record an item entering the pipeline
pub fn record_item_tracked(kind: TelemetryKind) {
    counter!(ITEMS_TRACKED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record an item leaving the pipeline early
pub fn record_item_dropped(kind: TelemetryKind, reason: DropReason) {
    counter!(ITEMS_DROPPED_TOTAL, "kind" => kind.as_str(), "reason" => reason.as_str())
        .increment(1);
}

/// Record a processor stage failure
pub fn record_processor_error(stage: &str) {
    counter!(PROCESSOR_ERRORS_TOTAL, "stage" => stage.to_string()).increment(1);
}

/// Record items handed to the sink
pub fn record_items_exported(count: usize) {
    counter!(ITEMS_EXPORTED_TOTAL).increment(count as u64);
}

/// Record a failed sink batch
pub fn record_export_failure() {
    counter!(EXPORT_FAILURES_TOTAL).increment(1);
}

/// Set the number of items waiting in the export queue
pub fn set_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

/// Record how long a sink batch send took
pub fn record_export_duration(duration_secs: f64) {
    histogram!(EXPORT_DURATION).record(duration_secs);
}

/// Record how long a flush took and whether it completed
pub fn record_flush_duration(outcome: &str, duration_secs: f64) {
    histogram!(FLUSH_DURATION, "outcome" => outcome.to_string()).record(duration_secs);
}
