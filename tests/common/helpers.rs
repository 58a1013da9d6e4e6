use function_telemetry::{
    InMemorySink, KindFilterMode, TelemetryClient, TelemetryClientBuilder, TelemetryItem,
    TelemetryKind,
};
use std::sync::Arc;
use std::time::Duration;

/// Timeout used for flushes that are expected to complete.
#[allow(dead_code)]
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder exporting into a fresh in-memory sink, with every kind let through.
///
/// The export interval is long so that only explicit flushes and full batches
/// reach the sink.
#[allow(dead_code)]
pub fn builder_with_sink() -> (TelemetryClientBuilder, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let builder = TelemetryClient::builder()
        .sink(sink.clone())
        .kind_filter(KindFilterMode::all())
        .export_interval(Duration::from_secs(3600));
    (builder, sink)
}

/// Client exporting into a fresh in-memory sink, with every kind let through.
#[allow(dead_code)]
pub fn client_with_sink() -> (TelemetryClient, Arc<InMemorySink>) {
    let (builder, sink) = builder_with_sink();
    (builder.build().expect("Failed to build client"), sink)
}

/// Kinds of the exported items, in export order.
#[allow(dead_code)]
pub fn exported_kinds(sink: &InMemorySink) -> Vec<TelemetryKind> {
    sink.items().iter().map(TelemetryItem::kind).collect()
}

/// Exported items of one kind.
#[allow(dead_code)]
pub fn exported_of(sink: &InMemorySink, kind: TelemetryKind) -> Vec<TelemetryItem> {
    sink.items()
        .into_iter()
        .filter(|item| item.kind() == kind)
        .collect()
}
