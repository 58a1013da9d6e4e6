use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::channel::{EnqueueError, ExportChannel, ExportOptions, FlushOutcome};
use crate::config::{DEFAULT_FLUSH_TIMEOUT, PipelineConfig};
use crate::connection::ConnectionString;
use crate::error::{TelemetryError, TelemetryResult};
use crate::initializer::{
    CloudRoleInitializer, DependencySuccessInitializer, EnvironmentInitializer, InitializerChain,
    TelemetryInitializer, VersionInitializer,
};
use crate::instrumentation::{
    DropReason, record_flush_duration, record_item_dropped, record_item_tracked,
};
use crate::item::{
    DependencyTelemetry, EventTelemetry, ExceptionTelemetry, MetricTelemetry, RequestTelemetry,
    SeverityLevel, TelemetryItem, TraceTelemetry,
};
use crate::live::{DEFAULT_LIVE_CAPACITY, DEFAULT_LIVE_WINDOW, LiveMetricsStream, LiveSnapshot};
use crate::processor::{
    KindFilter, KindFilterMode, LiveMetricsProcessor, ProcessorChain, TelemetryProcessor,
};
use crate::sampling::SamplingProcessor;
use crate::sink::{LogSink, NullSink, TelemetrySink};

struct ClientInner {
    initializers: InitializerChain,
    processors: ProcessorChain,
    channel: ExportChannel,
    live: Option<Arc<LiveMetricsStream>>,
    sink_name: String,
    flush_timeout: Duration,
    /// Set once the first item is refused by a stopped worker.
    closed_reported: AtomicBool,
}

/// The entry point for reporting telemetry.
///
/// Every `track*` call runs the item through the initializer chain and the
/// processor chain, then queues it for the background export worker. Tracking
/// never blocks on export, never fails and never panics: dropped items are
/// logged and counted instead.
///
/// Cloning is cheap and all clones share one pipeline. Build one client at
/// startup, pass it to the code that reports telemetry, and call
/// [`shutdown`](Self::shutdown) before the process exits.
///
/// # Example
///
/// ```ignore
/// use function_telemetry::{PipelineConfig, TelemetryClient};
///
/// let telemetry = TelemetryClient::from_config(&PipelineConfig::from_env()?)?;
///
/// telemetry.track_event("BlobCreated", [
///     ("BlobName", "greeting.txt"),
///     ("BlobUri", "https://account.blob.core.windows.net/greetings/greeting.txt"),
/// ]);
/// telemetry.flush(Duration::from_secs(5)).await;
/// ```
#[derive(Clone)]
pub struct TelemetryClient {
    inner: Arc<ClientInner>,
    operation_id: Option<Arc<str>>,
}

/// Builder for configuring a [`TelemetryClient`].
///
/// # Example
///
/// ```ignore
/// use function_telemetry::{InMemorySink, KindFilterMode, TelemetryClient};
///
/// let sink = Arc::new(InMemorySink::new());
/// let client = TelemetryClient::builder()
///     .version("1.4.0")
///     .environment("dev")
///     .kind_filter(KindFilterMode::all())
///     .sampling_percentage(50.0)
///     .sink(sink.clone())
///     .build()?;
/// ```
pub struct TelemetryClientBuilder {
    version: String,
    environment: String,
    cloud_role: Option<String>,
    connection_string: Option<String>,
    sink: Option<Arc<dyn TelemetrySink>>,
    sampling_percentage: f64,
    kind_filter: KindFilterMode,
    dependency_success_rule: bool,
    live_metrics: bool,
    live_capacity: usize,
    live_window: Duration,
    initializers: Vec<Arc<dyn TelemetryInitializer>>,
    processors: Vec<Arc<dyn TelemetryProcessor>>,
    export: ExportOptions,
    flush_timeout: Duration,
}

impl TelemetryClientBuilder {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: String::new(),
            cloud_role: None,
            connection_string: None,
            sink: None,
            sampling_percentage: 100.0,
            kind_filter: KindFilterMode::default(),
            dependency_success_rule: false,
            live_metrics: true,
            live_capacity: DEFAULT_LIVE_CAPACITY,
            live_window: DEFAULT_LIVE_WINDOW,
            initializers: Vec::new(),
            processors: Vec::new(),
            export: ExportOptions::default(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Start from a [`PipelineConfig`], keeping any sink and custom stages
    /// already added.
    pub fn config(mut self, config: &PipelineConfig) -> Self {
        self.version = config.app_version.clone();
        self.environment = config.environment.clone();
        self.cloud_role = config.cloud_role.clone();
        self.connection_string = config.connection_string.clone();
        self.sampling_percentage = config.sampling_percentage;
        self.kind_filter = config.kind_filter.clone();
        self.dependency_success_rule = config.dependency_success_rule;
        self.live_metrics = config.live_metrics;
        self.live_capacity = config.live_capacity;
        self.live_window = config.live_window;
        self.export = ExportOptions {
            queue_capacity: config.queue_capacity,
            batch_size: config.batch_size,
            export_interval: config.export_interval,
        };
        self.flush_timeout = config.flush_timeout;
        self
    }

    /// Component version stamped on items that have none (default: crate version)
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Deployment tag: `"dev"` or `"test"` add an `Environment` property
    pub fn environment(mut self, tag: impl Into<String>) -> Self {
        self.environment = tag.into();
        self
    }

    /// Role name stamped on items that have none
    pub fn cloud_role(mut self, role: impl Into<String>) -> Self {
        self.cloud_role = Some(role.into());
        self
    }

    /// Connection string of the monitoring resource. Ignored when a sink is set.
    pub fn connection_string(mut self, value: impl Into<String>) -> Self {
        self.connection_string = Some(value.into());
        self
    }

    /// Export to this sink instead of the one derived from the connection string
    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Percentage of operations to keep (default: 100)
    pub fn sampling_percentage(mut self, percentage: f64) -> Self {
        self.sampling_percentage = percentage;
        self
    }

    /// Which kinds reach export (default: traces only)
    pub fn kind_filter(mut self, mode: KindFilterMode) -> Self {
        self.kind_filter = mode;
        self
    }

    /// Derive dependency success from duration (default: false)
    pub fn dependency_success_rule(mut self, enabled: bool) -> Self {
        self.dependency_success_rule = enabled;
        self
    }

    /// Keep a live-metrics window (default: true)
    pub fn live_metrics(mut self, enabled: bool) -> Self {
        self.live_metrics = enabled;
        self
    }

    /// Size and age bound of the live-metrics window (default: 1024, 60s)
    pub fn live_window(mut self, capacity: usize, max_age: Duration) -> Self {
        self.live_capacity = capacity;
        self.live_window = max_age;
        self
    }

    /// Add an initializer after the built-in ones
    pub fn initializer(mut self, initializer: impl TelemetryInitializer + 'static) -> Self {
        self.initializers.push(Arc::new(initializer));
        self
    }

    /// Add a processor after the kind filter and live metrics, before sampling
    pub fn processor(mut self, processor: impl TelemetryProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Bound of the export queue (default: 2048)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.export.queue_capacity = capacity;
        self
    }

    /// Items per sink batch (default: 64)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.export.batch_size = size;
        self
    }

    /// How often a partial batch is sent (default: 1s)
    pub fn export_interval(mut self, interval: Duration) -> Self {
        self.export.export_interval = interval;
        self
    }

    /// Timeout used by [`TelemetryClient::flush_default`] (default: 5s)
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Assemble the chains and start the export worker.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::NoRuntime`] when called outside a tokio
    /// runtime. An unusable connection string is not an error: the client
    /// exports to a [`NullSink`] and logs why.
    pub fn build(self) -> TelemetryResult<TelemetryClient> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TelemetryError::NoRuntime)?;

        let sink = match self.sink {
            Some(sink) => sink,
            None => resolve_sink(self.connection_string.as_deref()),
        };

        let mut initializers: Vec<Arc<dyn TelemetryInitializer>> = vec![
            Arc::new(VersionInitializer::new(self.version)),
            Arc::new(EnvironmentInitializer::new(&self.environment)),
        ];
        if self.dependency_success_rule {
            initializers.push(Arc::new(DependencySuccessInitializer::default()));
        }
        if let Some(role) = self.cloud_role {
            initializers.push(Arc::new(CloudRoleInitializer::new(role)));
        }
        initializers.extend(self.initializers);

        let blocked = self.kind_filter.blocked_kinds();
        if !blocked.is_empty() {
            let blocked = blocked
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(blocked = %blocked, "Kind filter drops these kinds before export");
        }

        let mut processors: Vec<Arc<dyn TelemetryProcessor>> =
            vec![Arc::new(KindFilter::new(self.kind_filter))];
        let live = self.live_metrics.then(|| {
            Arc::new(LiveMetricsStream::new(
                self.live_capacity,
                self.live_window,
            ))
        });
        if let Some(stream) = &live {
            processors.push(Arc::new(LiveMetricsProcessor::new(stream.clone())));
        }
        processors.extend(self.processors);
        let sampling = SamplingProcessor::new(self.sampling_percentage);
        let sampling_percentage = sampling.percentage();
        processors.push(Arc::new(sampling));

        let initializers = InitializerChain::new(initializers);
        let processors = ProcessorChain::new(processors);
        let sink_name = sink.name().to_string();
        let channel = ExportChannel::start(&runtime, sink, self.export);

        tracing::info!(
            sink = %sink_name,
            initializers = ?initializers.names(),
            processors = ?processors.names(),
            sampling_percentage,
            "Telemetry pipeline started"
        );

        Ok(TelemetryClient {
            inner: Arc::new(ClientInner {
                initializers,
                processors,
                channel,
                live,
                sink_name,
                flush_timeout: self.flush_timeout,
                closed_reported: AtomicBool::new(false),
            }),
            operation_id: None,
        })
    }
}

impl Default for TelemetryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_sink(connection_string: Option<&str>) -> Arc<dyn TelemetrySink> {
    let Some(value) = connection_string else {
        tracing::info!("No connection string configured; telemetry will not be exported");
        return Arc::new(NullSink);
    };

    match ConnectionString::parse(value) {
        Ok(cs) => Arc::new(LogSink::new(
            cs.instrumentation_key(),
            cs.ingestion_endpoint(),
        )),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring connection string; telemetry will not be exported");
            Arc::new(NullSink)
        }
    }
}

impl TelemetryClient {
    /// Access the builder for custom configuration
    pub fn builder() -> TelemetryClientBuilder {
        TelemetryClientBuilder::new()
    }

    /// Build a client from a [`PipelineConfig`].
    pub fn from_config(config: &PipelineConfig) -> TelemetryResult<Self> {
        TelemetryClientBuilder::new().config(config).build()
    }

    /// Build a client from the process environment.
    pub fn from_env() -> TelemetryResult<Self> {
        Self::from_config(&PipelineConfig::from_env()?)
    }

    /// A client sharing this pipeline that stamps `operation_id` on every item
    /// that does not carry one.
    ///
    /// Items of one operation get the same sampling decision.
    pub fn for_operation(&self, operation_id: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            operation_id: Some(Arc::from(operation_id.into())),
        }
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Name of the sink the export worker sends to.
    pub fn sink_name(&self) -> &str {
        &self.inner.sink_name
    }

    /// Items queued but not yet handed to the sink.
    pub fn pending(&self) -> usize {
        self.inner.channel.pending()
    }

    /// Track a named event with string properties.
    pub fn track_event<I, K, V>(&self, name: impl Into<String>, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut item = TelemetryItem::new(EventTelemetry::new(name));
        item.extend_properties(properties);
        self.track(item);
    }

    pub fn track_trace(&self, message: impl Into<String>) {
        self.track(TelemetryItem::new(TraceTelemetry::new(message)));
    }

    pub fn track_trace_with_severity(&self, message: impl Into<String>, severity: SeverityLevel) {
        self.track(TelemetryItem::new(
            TraceTelemetry::new(message).with_severity(severity),
        ));
    }

    pub fn track_request(&self, request: RequestTelemetry) {
        self.track(TelemetryItem::new(request));
    }

    pub fn track_dependency(&self, dependency: DependencyTelemetry) {
        self.track(TelemetryItem::new(dependency));
    }

    /// Track an error, including its chain of sources.
    pub fn track_exception<E>(&self, error: &E)
    where
        E: StdError + ?Sized,
    {
        self.track(TelemetryItem::new(ExceptionTelemetry::from_error(error)));
    }

    pub fn track_metric(&self, metric: MetricTelemetry) {
        self.track(TelemetryItem::new(metric));
    }

    pub fn track_metric_value(&self, name: impl Into<String>, value: f64) {
        self.track_metric(MetricTelemetry::new(name, value));
    }

    /// Run a prepared item through the pipeline.
    pub fn track(&self, mut item: TelemetryItem) {
        let kind = item.kind();
        record_item_tracked(kind);

        if item.context.operation_id.is_none()
            && let Some(operation_id) = &self.operation_id
        {
            item.context.operation_id = Some(operation_id.to_string());
        }

        self.inner.initializers.apply(&mut item);
        let Some(item) = self.inner.processors.run(item) else {
            return;
        };

        if let Err(e) = self.inner.channel.enqueue(item) {
            record_item_dropped(kind, DropReason::QueueFull);
            match e {
                EnqueueError::Full => {
                    tracing::warn!(kind = %kind, "Export queue full, dropping telemetry item")
                }
                EnqueueError::Closed => {
                    if self.inner.closed_reported.swap(true, Ordering::Relaxed) {
                        tracing::debug!(kind = %kind, "Export worker stopped, dropping telemetry item")
                    } else {
                        tracing::warn!(
                            kind = %kind,
                            "Export worker stopped; dropping this and every later telemetry item"
                        )
                    }
                }
            }
        }
    }

    /// Wait until everything tracked so far has been handed to the sink, for
    /// at most `timeout`.
    ///
    /// Returns at once when nothing is pending. Only the calling task waits;
    /// other callers keep tracking.
    pub async fn flush(&self, timeout: Duration) -> FlushOutcome {
        let start = Instant::now();
        let outcome = self.inner.channel.flush(timeout).await;
        record_flush_duration(outcome.as_str(), start.elapsed().as_secs_f64());

        if let FlushOutcome::Partial { pending } = outcome {
            tracing::warn!(pending, ?timeout, "Flush timed out");
        }
        outcome
    }

    /// [`flush`](Self::flush) with the configured flush timeout.
    pub async fn flush_default(&self) -> FlushOutcome {
        self.flush(self.inner.flush_timeout).await
    }

    /// Snapshot of the live-metrics window, if enabled.
    pub fn live_metrics(&self) -> Option<LiveSnapshot> {
        self.inner.live.as_ref().map(|stream| stream.snapshot())
    }

    /// The live-metrics window itself, if enabled.
    pub fn live_stream(&self) -> Option<&Arc<LiveMetricsStream>> {
        self.inner.live.as_ref()
    }

    /// Flush and stop the export worker.
    ///
    /// Items still queued when `timeout` runs out are discarded; their count
    /// is logged and returned in [`FlushOutcome::Partial`]. Tracking after
    /// shutdown drops items.
    pub async fn shutdown(&self, timeout: Duration) -> FlushOutcome {
        let outcome = self.inner.channel.shutdown(timeout).await;
        tracing::info!(outcome = outcome.as_str(), "Telemetry pipeline stopped");
        outcome
    }
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("initializers", &self.inner.initializers)
            .field("processors", &self.inner.processors)
            .field("sink", &self.inner.sink_name)
            .field("operation_id", &self.operation_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_build_without_runtime_fails() {
        let err = TelemetryClient::builder().build().unwrap_err();
        assert!(matches!(err, TelemetryError::NoRuntime));
    }

    #[tokio::test]
    async fn test_sink_resolution() {
        let none = TelemetryClient::builder().build().unwrap();
        assert_eq!(none.sink_name(), "null");

        let invalid = TelemetryClient::builder()
            .connection_string("InstrumentationKey=nope")
            .build()
            .unwrap();
        assert_eq!(invalid.sink_name(), "null");

        let valid = TelemetryClient::builder()
            .connection_string("InstrumentationKey=00000000-0000-0000-0000-000000000001")
            .build()
            .unwrap();
        assert_eq!(valid.sink_name(), "log");
    }

    #[tokio::test]
    async fn test_for_operation_shares_pipeline() {
        let client = TelemetryClient::builder().build().unwrap();
        let scoped = client.for_operation("op-1");

        assert_eq!(client.operation_id(), None);
        assert_eq!(scoped.operation_id(), Some("op-1"));
        assert!(Arc::ptr_eq(&client.inner, &scoped.inner));
    }

    #[tokio::test]
    async fn test_stopped_worker_reported_once() {
        let client = TelemetryClient::builder()
            .kind_filter(KindFilterMode::all())
            .build()
            .unwrap();
        client.shutdown(Duration::from_secs(5)).await;
        assert!(!client.inner.closed_reported.load(Ordering::Relaxed));

        for n in 0..10 {
            client.track_trace(format!("late {n}"));
        }
        assert!(client.inner.closed_reported.load(Ordering::Relaxed));
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_default_chain_order() {
        let client = TelemetryClient::builder()
            .dependency_success_rule(true)
            .cloud_role("HttpTrigger1")
            .build()
            .unwrap();

        assert_eq!(
            client.inner.processors.names(),
            ["kind_filter", "live_metrics", "sampling"]
        );
        assert_eq!(
            client.inner.initializers.names(),
            ["version", "environment", "dependency_success", "cloud_role"]
        );
    }
}
