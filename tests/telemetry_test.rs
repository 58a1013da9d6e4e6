//! Integration tests for the pipeline's own metrics.
//!
//! A single `DebuggingRecorder` is installed globally for this test binary,
//! so assertions use labels unique to each test or lower bounds.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::helpers::{FLUSH_TIMEOUT, builder_with_sink};
use common::processors::{FAIL_MARKER, FailingProcessor};
use function_telemetry::instrumentation::{
    FLUSH_DURATION, ITEMS_DROPPED_TOTAL, ITEMS_EXPORTED_TOTAL, ITEMS_TRACKED_TOTAL,
    PROCESSOR_ERRORS_TOTAL,
};
use function_telemetry::{
    FnProcessor, Flow, KindFilterMode, TelemetryClient, TelemetryItem, TraceTelemetry,
};
use metrics_util::CompositeKey;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshot, Snapshotter};
use std::sync::OnceLock;

// ============================================================================
// Metrics Helper Functions
// ============================================================================

fn find_counter_with_labels(
    snapshot: Snapshot,
    name: &str,
    labels: &[(&str, &str)],
) -> Option<(CompositeKey, u64)> {
    snapshot
        .into_vec()
        .into_iter()
        .find(|(key, _, _, _)| {
            key.key().name() == name
                && labels.iter().all(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|l| l.key() == *k && l.value() == *v)
                })
        })
        .map(|(key, _, _, value)| {
            let count = match value {
                DebugValue::Counter(c) => c,
                _ => panic!("Expected counter"),
            };
            (key, count)
        })
}

fn count_metrics_by_name(snapshot: Snapshot, name: &str) -> usize {
    snapshot
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == name)
        .count()
}

// Global snapshotter for tests - recorder installed once
static GLOBAL_SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();

fn get_snapshotter() -> Snapshotter {
    GLOBAL_SNAPSHOTTER
        .get_or_init(|| {
            let recorder = DebuggingRecorder::new();
            let snapshotter = recorder.snapshotter();
            recorder.install().expect("Failed to install recorder");
            snapshotter
        })
        .clone()
}

// ============================================================================
// Metrics Integration Tests
// ============================================================================

#[tokio::test]
async fn test_tracked_and_exported_metrics() {
    let snapshotter = get_snapshotter();
    let (builder, _sink) = builder_with_sink();
    let client = builder.build().unwrap();

    for n in 0..3 {
        client.track_event(format!("event {n}"), [("n", n.to_string())]);
    }
    client.flush(FLUSH_TIMEOUT).await;

    let (_, tracked) = find_counter_with_labels(
        snapshotter.snapshot(),
        ITEMS_TRACKED_TOTAL,
        &[("kind", "event")],
    )
    .expect("tracked counter should exist");
    assert!(tracked >= 3);

    let (_, exported) = find_counter_with_labels(snapshotter.snapshot(), ITEMS_EXPORTED_TOTAL, &[])
        .expect("exported counter should exist");
    assert!(exported >= 3);

    assert!(count_metrics_by_name(snapshotter.snapshot(), FLUSH_DURATION) >= 1);
}

#[tokio::test]
async fn test_filtered_and_sampled_drops_are_labelled() {
    let snapshotter = get_snapshotter();

    let filtering = TelemetryClient::builder()
        .kind_filter(KindFilterMode::traces_only())
        .build()
        .unwrap();
    filtering.track_metric_value("ignored", 1.0);

    let (builder, _sink) = builder_with_sink();
    let sampling = builder.sampling_percentage(0.0).build().unwrap();
    sampling.track_dependency(function_telemetry::DependencyTelemetry::new(
        "PUT greeting.txt",
        "blob",
        std::time::Duration::from_millis(4),
        true,
    ));

    let filtered = find_counter_with_labels(
        snapshotter.snapshot(),
        ITEMS_DROPPED_TOTAL,
        &[("kind", "metric"), ("reason", "filtered")],
    );
    assert!(filtered.is_some_and(|(_, count)| count >= 1));

    let sampled = find_counter_with_labels(
        snapshotter.snapshot(),
        ITEMS_DROPPED_TOTAL,
        &[("kind", "dependency"), ("reason", "sampled")],
    );
    assert!(sampled.is_some_and(|(_, count)| count >= 1));
}

#[tokio::test]
async fn test_processor_errors_counted_per_stage() {
    let snapshotter = get_snapshotter();
    let (builder, sink) = builder_with_sink();
    let client = builder
        .processor(FailingProcessor)
        .processor(FnProcessor::new("metrics_probe", |item: TelemetryItem| {
            if item.data.name() == "probe" {
                return Err(anyhow::anyhow!("probe rejected").into());
            }
            Ok(Flow::Forward(item))
        }))
        .build()
        .unwrap();

    let mut marked = TelemetryItem::new(TraceTelemetry::new("marked"));
    marked.set_property(FAIL_MARKER, "yes");
    client.track(marked);
    client.track_trace("probe");
    client.track_trace("fine");
    client.flush(FLUSH_TIMEOUT).await;

    assert_eq!(sink.len(), 1);

    let (_, failing) = find_counter_with_labels(
        snapshotter.snapshot(),
        PROCESSOR_ERRORS_TOTAL,
        &[("stage", "failing")],
    )
    .expect("failing stage counter should exist");
    assert!(failing >= 1);

    let (_, probe) = find_counter_with_labels(
        snapshotter.snapshot(),
        PROCESSOR_ERRORS_TOTAL,
        &[("stage", "metrics_probe")],
    )
    .expect("probe stage counter should exist");
    assert_eq!(probe, 1);
}
