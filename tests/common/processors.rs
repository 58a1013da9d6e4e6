use function_telemetry::{
    Flow, ProcessError, ProcessResult, TelemetryInitializer, TelemetryItem, TelemetryKind,
    TelemetryProcessor,
};
use std::sync::{Arc, Mutex};

// ============================================================================
// SpyProcessor - Records every item it sees and forwards it unchanged
// ============================================================================

#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct SpyProcessor {
    seen: Arc<Mutex<Vec<TelemetryItem>>>,
}

#[allow(dead_code)]
impl SpyProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<TelemetryItem> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_kinds(&self) -> Vec<TelemetryKind> {
        self.seen().iter().map(TelemetryItem::kind).collect()
    }
}

impl TelemetryProcessor for SpyProcessor {
    fn name(&self) -> &str {
        "spy"
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        self.seen.lock().unwrap().push(item.clone());
        Ok(Flow::Forward(item))
    }
}

// ============================================================================
// FailingProcessor - Fails on items carrying a marker property
// ============================================================================

#[allow(dead_code)]
pub const FAIL_MARKER: &str = "fail";

#[allow(dead_code)]
pub struct FailingProcessor;

impl TelemetryProcessor for FailingProcessor {
    fn name(&self) -> &str {
        "failing"
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        if item.property(FAIL_MARKER).is_some() {
            return Err(ProcessError::Failed(anyhow::anyhow!(
                "refusing {}",
                item.data.name()
            )));
        }
        Ok(Flow::Forward(item))
    }
}

// ============================================================================
// PanickingProcessor - Panics on items carrying a marker property
// ============================================================================

#[allow(dead_code)]
pub const PANIC_MARKER: &str = "panic";

#[allow(dead_code)]
pub struct PanickingProcessor;

impl TelemetryProcessor for PanickingProcessor {
    fn name(&self) -> &str {
        "panicking"
    }

    fn process(&self, item: TelemetryItem) -> ProcessResult<Flow> {
        if item.property(PANIC_MARKER).is_some() {
            panic!("stage bug on {}", item.data.name());
        }
        Ok(Flow::Forward(item))
    }
}

// ============================================================================
// Initializers - One that panics after a partial write, one that tags items
// ============================================================================

#[allow(dead_code)]
pub struct PanickingInitializer;

impl TelemetryInitializer for PanickingInitializer {
    fn name(&self) -> &str {
        "panicking_initializer"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        item.set_property("BeforePanic", "written");
        panic!("initializer bug on {}", item.data.name());
    }
}

#[allow(dead_code)]
pub struct TagInitializer(pub &'static str);

impl TelemetryInitializer for TagInitializer {
    fn name(&self) -> &str {
        "tag"
    }

    fn initialize(&self, item: &mut TelemetryItem) {
        item.set_property(self.0, "yes");
    }
}

// ============================================================================
// Errors for exception tracking
// ============================================================================

#[allow(dead_code)]
#[derive(Debug, thiserror::Error)]
#[error("blob upload failed")]
pub struct UploadError {
    #[source]
    pub source: std::io::Error,
}
