//! Processors filter and transform items after initialization.
//!
//! A [`ProcessorChain`] is an ordered list of stages walked front to back.
//! Each stage either forwards the (possibly changed) item to the next stage or
//! drops it. A stage that fails drops the item too: the failure is logged and
//! counted at the chain boundary and never reaches the caller.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{ProcessError, ProcessResult, TelemetryError};
use crate::instrumentation::{DropReason, record_item_dropped, record_processor_error};
use crate::item::{TelemetryItem, TelemetryKind};
use crate::live::LiveMetricsStream;

/// What a stage decided for one item.
///
/// Dropping is not an error: the item is discarded and no later stage runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Hand the item to the next stage.
    Forward(TelemetryItem),
    /// Discard the item.
    Drop,
}

/// A filter or transform stage in the processor chain.
pub trait TelemetryProcessor: Send + Sync {
    /// Name used in logs and metric labels.
    fn name(&self) -> &str;

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow>;

    /// Label recorded when this stage drops an item.
    fn drop_reason(&self) -> DropReason {
        DropReason::Filtered
    }
}

/// Which kinds a [`KindFilter`] lets through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilterMode {
    /// Forward only the listed kinds.
    Allow(BTreeSet<TelemetryKind>),
    /// Forward everything except the listed kinds.
    Deny(BTreeSet<TelemetryKind>),
}

impl Default for KindFilterMode {
    fn default() -> Self {
        Self::traces_only()
    }
}

impl KindFilterMode {
    /// Forward trace items and nothing else.
    pub fn traces_only() -> Self {
        KindFilterMode::Allow(BTreeSet::from([TelemetryKind::Trace]))
    }

    /// Forward every kind.
    pub fn all() -> Self {
        KindFilterMode::Deny(BTreeSet::new())
    }

    pub fn passes(&self, kind: TelemetryKind) -> bool {
        match self {
            KindFilterMode::Allow(kinds) => kinds.contains(&kind),
            KindFilterMode::Deny(kinds) => !kinds.contains(&kind),
        }
    }

    /// Kinds this mode drops.
    pub fn blocked_kinds(&self) -> Vec<TelemetryKind> {
        TelemetryKind::ALL
            .into_iter()
            .filter(|kind| !self.passes(*kind))
            .collect()
    }

    /// Parses `traces-only`, `all`, `allow:<kinds>` or `deny:<kinds>`, where
    /// `<kinds>` is a comma-separated list such as `trace,event`.
    pub fn parse(value: &str) -> Result<Self, TelemetryError> {
        let invalid = || TelemetryError::InvalidConfig {
            key: "kind_filter".to_string(),
            value: value.to_string(),
        };

        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "traces-only" | "trace-only" => return Ok(Self::traces_only()),
            "all" | "none" => return Ok(Self::all()),
            _ => {}
        }

        let (mode, list) = trimmed.split_once(':').ok_or_else(invalid)?;
        let kinds = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| TelemetryKind::parse(s).ok_or_else(invalid))
            .collect::<Result<BTreeSet<_>, _>>()?;

        match mode.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(KindFilterMode::Allow(kinds)),
            "deny" => Ok(KindFilterMode::Deny(kinds)),
            _ => Err(invalid()),
        }
    }
}

/// Drops items by kind.
///
/// The default mode is an allow-list holding only [`TelemetryKind::Trace`]:
/// requests, dependencies, exceptions, metrics and events never get past it.
/// Use [`KindFilter::all`] or a deny-list to let them through.
#[derive(Debug, Clone, Default)]
pub struct KindFilter {
    mode: KindFilterMode,
}

impl KindFilter {
    pub fn new(mode: KindFilterMode) -> Self {
        Self { mode }
    }

    pub fn traces_only() -> Self {
        Self::new(KindFilterMode::traces_only())
    }

    pub fn all() -> Self {
        Self::new(KindFilterMode::all())
    }

    pub fn allow(kinds: impl IntoIterator<Item = TelemetryKind>) -> Self {
        Self::new(KindFilterMode::Allow(kinds.into_iter().collect()))
    }

    pub fn deny(kinds: impl IntoIterator<Item = TelemetryKind>) -> Self {
        Self::new(KindFilterMode::Deny(kinds.into_iter().collect()))
    }

    pub fn mode(&self) -> &KindFilterMode {
        &self.mode
    }
}

impl TelemetryProcessor for KindFilter {
    fn name(&self) -> &str {
        "kind_filter"
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        if self.mode.passes(item.kind()) {
            Ok(Flow::Forward(item))
        } else {
            Ok(Flow::Drop)
        }
    }
}

/// Publishes every item to a [`LiveMetricsStream`] and forwards it unchanged.
#[derive(Debug, Clone)]
pub struct LiveMetricsProcessor {
    stream: Arc<LiveMetricsStream>,
}

impl LiveMetricsProcessor {
    pub fn new(stream: Arc<LiveMetricsStream>) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &Arc<LiveMetricsStream> {
        &self.stream
    }
}

impl TelemetryProcessor for LiveMetricsProcessor {
    fn name(&self) -> &str {
        "live_metrics"
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        self.stream.record(&item);
        Ok(Flow::Forward(item))
    }
}

/// A stage backed by a closure.
///
/// # Example
///
/// ```
/// use function_telemetry::{Flow, FnProcessor, TelemetryItem};
///
/// let redact = FnProcessor::new("redact_uri", |mut item: TelemetryItem| {
///     item.context.properties.remove("BlobUri");
///     Ok(Flow::Forward(item))
/// });
/// ```
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(TelemetryItem) -> ProcessResult<Flow> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TelemetryProcessor for FnProcessor<F>
where
    F: Fn(TelemetryItem) -> ProcessResult<Flow> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        (self.f)(item)
    }
}

/// Ordered, immutable list of processor stages.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    stages: Arc<[Arc<dyn TelemetryProcessor>]>,
}

impl ProcessorChain {
    pub fn new(stages: Vec<Arc<dyn TelemetryProcessor>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Walks `item` through every stage. Returns the item if it reached the
    /// end of the chain, `None` if a stage dropped it or failed.
    pub fn run(&self, mut item: TelemetryItem) -> Option<TelemetryItem> {
        for stage in self.stages.iter() {
            let kind = item.kind();
            let outcome = catch_unwind(AssertUnwindSafe(|| stage.process(item)))
                .unwrap_or_else(|_| {
                    Err(ProcessError::Failed(anyhow::anyhow!(
                        "stage `{}` panicked",
                        stage.name()
                    )))
                });

            match outcome {
                Ok(Flow::Forward(next)) => item = next,
                Ok(Flow::Drop) => {
                    tracing::trace!(stage = stage.name(), %kind, "Item dropped");
                    record_item_dropped(kind, stage.drop_reason());
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        stage = stage.name(),
                        %kind,
                        error = %e,
                        "Processor failed; dropping item"
                    );
                    record_processor_error(stage.name());
                    record_item_dropped(kind, DropReason::ProcessorError);
                    return None;
                }
            }
        }
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the registered stages, in order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
