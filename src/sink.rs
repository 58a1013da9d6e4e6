//! Export sinks: where batches go after the processor chain.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{SinkError, SinkResult};
use crate::item::TelemetryItem;

/// Destination for exported telemetry.
///
/// The export worker calls [`send`](TelemetrySink::send) with batches of
/// items that survived the processor chain, and [`flush`](TelemetrySink::flush)
/// when a caller flushes the client or the worker shuts down. A failed send is
/// logged and counted by the worker; the batch is not retried.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, batch: Vec<TelemetryItem>) -> SinkResult<()>;

    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Discards everything. Used when no valid connection string is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, _batch: Vec<TelemetryItem>) -> SinkResult<()> {
        Ok(())
    }
}

/// Keeps every exported item in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    items: Mutex<Vec<TelemetryItem>>,
    closed: AtomicBool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far, in arrival order.
    pub fn items(&self) -> Vec<TelemetryItem> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Reject every later batch with [`SinkError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TelemetrySink for InMemorySink {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn send(&self, batch: Vec<TelemetryItem>) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        self.lock().extend(batch);
        Ok(())
    }
}

/// Writes each item as a JSON `info!` event, tagged with the
/// instrumentation key of the resource it is addressed to.
#[derive(Debug, Clone)]
pub struct LogSink {
    instrumentation_key: Uuid,
    endpoint: String,
}

impl LogSink {
    pub fn new(instrumentation_key: Uuid, endpoint: impl Into<String>) -> Self {
        Self {
            instrumentation_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn instrumentation_key(&self) -> Uuid {
        self.instrumentation_key
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, batch: Vec<TelemetryItem>) -> SinkResult<()> {
        for item in &batch {
            let body = serde_json::to_string(item)?;
            tracing::info!(
                target: "function_telemetry::export",
                instrumentation_key = %self.instrumentation_key,
                endpoint = %self.endpoint,
                kind = %item.kind(),
                "{body}"
            );
        }
        Ok(())
    }
}
