use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_EXPORT_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use crate::instrumentation::{
    record_export_duration, record_export_failure, record_items_exported, set_queue_depth,
};
use crate::item::TelemetryItem;
use crate::sink::TelemetrySink;

/// Result of waiting for queued items to reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Everything queued before the call was handed to the sink.
    Complete,
    /// The timeout elapsed first; `pending` items were still queued.
    Partial { pending: usize },
}

impl FlushOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, FlushOutcome::Complete)
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FlushOutcome::Complete => "complete",
            FlushOutcome::Partial { .. } => "partial",
        }
    }
}

/// Sizing of the export queue and worker.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Bound of the queue between `track*` callers and the worker (default: 2048)
    pub queue_capacity: usize,
    /// Items per sink batch (default: 64)
    pub batch_size: usize,
    /// How often a partial batch is sent (default: 1s)
    pub export_interval: Duration,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            export_interval: DEFAULT_EXPORT_INTERVAL,
        }
    }
}

enum Message {
    Item(TelemetryItem),
    /// Send everything received so far, flush the sink, then reply.
    Flush(oneshot::Sender<()>),
}

/// Why [`ExportChannel::enqueue`] refused an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    Full,
    Closed,
}

/// Bounded queue in front of a background task that batches items into a
/// [`TelemetrySink`].
///
/// `pending` counts items accepted by [`enqueue`](Self::enqueue) whose batch
/// has not yet come back from [`TelemetrySink::send`].
pub(crate) struct ExportChannel {
    sender: mpsc::Sender<Message>,
    pending: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExportChannel {
    pub(crate) fn start(
        runtime: &tokio::runtime::Handle,
        sink: Arc<dyn TelemetrySink>,
        options: ExportOptions,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = runtime.spawn(run_loop(
            receiver,
            shutdown_rx,
            sink,
            options,
            pending.clone(),
        ));

        Self {
            sender,
            pending,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue an item without waiting.
    pub(crate) fn enqueue(&self, item: TelemetryItem) -> Result<(), EnqueueError> {
        // Count before sending so the worker never decrements below zero.
        let depth = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        match self.sender.try_send(Message::Item(item)) {
            Ok(()) => {
                set_queue_depth(depth);
                Ok(())
            }
            Err(e) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(EnqueueError::Full),
                    mpsc::error::TrySendError::Closed(_) => Err(EnqueueError::Closed),
                }
            }
        }
    }

    /// Wait until every item queued before this call has been handed to the
    /// sink, or until `timeout` elapses.
    pub(crate) async fn flush(&self, timeout: Duration) -> FlushOutcome {
        if self.pending() == 0 {
            return FlushOutcome::Complete;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let waited = tokio::time::timeout(timeout, async {
            self.sender.send(Message::Flush(reply_tx)).await.ok()?;
            reply_rx.await.ok()
        })
        .await;

        match waited {
            Ok(Some(())) => FlushOutcome::Complete,
            _ => match self.pending() {
                0 => FlushOutcome::Complete,
                pending => FlushOutcome::Partial { pending },
            },
        }
    }

    /// Flush, then stop the worker. Items still queued when `timeout` runs
    /// out are discarded and reported in the returned outcome.
    pub(crate) async fn shutdown(&self, timeout: Duration) -> FlushOutcome {
        let started = Instant::now();
        let flushed = self.flush(timeout).await;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return flushed;
        };

        let _ = self.shutdown_tx.send(());
        let remaining = timeout.saturating_sub(started.elapsed());
        if tokio::time::timeout(remaining, &mut handle).await.is_err() {
            handle.abort();
        }

        match self.pending() {
            0 => FlushOutcome::Complete,
            discarded => {
                tracing::warn!(discarded, "Export worker stopped with unsent telemetry");
                FlushOutcome::Partial { pending: discarded }
            }
        }
    }
}

impl Drop for ExportChannel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn run_loop(
    mut receiver: mpsc::Receiver<Message>,
    mut shutdown_rx: broadcast::Receiver<()>,
    sink: Arc<dyn TelemetrySink>,
    options: ExportOptions,
    pending: Arc<AtomicUsize>,
) {
    let batch_size = options.batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut interval =
        tokio::time::interval(options.export_interval.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(sink = sink.name(), batch_size, "Export worker started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Export worker shutting down, draining queue...");
                let mut waiting = Vec::new();
                while let Ok(message) = receiver.try_recv() {
                    match message {
                        Message::Item(item) => {
                            batch.push(item);
                            if batch.len() >= batch_size {
                                export_batch(sink.as_ref(), &mut batch, &pending).await;
                            }
                        }
                        Message::Flush(reply) => waiting.push(reply),
                    }
                }
                export_batch(sink.as_ref(), &mut batch, &pending).await;
                flush_sink(sink.as_ref()).await;
                for reply in waiting {
                    let _ = reply.send(());
                }
                tracing::info!("Export worker shutdown complete");
                break;
            }

            message = receiver.recv() => match message {
                Some(Message::Item(item)) => {
                    batch.push(item);
                    if batch.len() >= batch_size {
                        export_batch(sink.as_ref(), &mut batch, &pending).await;
                    }
                }
                Some(Message::Flush(reply)) => {
                    export_batch(sink.as_ref(), &mut batch, &pending).await;
                    flush_sink(sink.as_ref()).await;
                    let _ = reply.send(());
                }
                None => {
                    export_batch(sink.as_ref(), &mut batch, &pending).await;
                    flush_sink(sink.as_ref()).await;
                    break;
                }
            },

            _ = interval.tick() => {
                export_batch(sink.as_ref(), &mut batch, &pending).await;
            }
        }
    }
}

async fn export_batch(sink: &dyn TelemetrySink, batch: &mut Vec<TelemetryItem>, pending: &AtomicUsize) {
    if batch.is_empty() {
        return;
    }

    let items = std::mem::take(batch);
    let count = items.len();
    let start = Instant::now();

    match sink.send(items).await {
        Ok(()) => {
            record_items_exported(count);
            tracing::debug!(sink = sink.name(), count, "Exported batch");
        }
        Err(e) => {
            record_export_failure();
            tracing::error!(sink = sink.name(), count, "Failed to export batch: {}", e);
        }
    }
    record_export_duration(start.elapsed().as_secs_f64());

    let left = pending.fetch_sub(count, Ordering::SeqCst).saturating_sub(count);
    set_queue_depth(left);
}

async fn flush_sink(sink: &dyn TelemetrySink) {
    if let Err(e) = sink.flush().await {
        tracing::error!(sink = sink.name(), "Failed to flush sink: {}", e);
    }
}
