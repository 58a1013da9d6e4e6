use thiserror::Error;

use crate::item::TelemetryKind;

/// Errors surfaced while building or configuring the pipeline.
///
/// None of these reach callers of the `track*` methods. Once a
/// [`TelemetryClient`](crate::TelemetryClient) exists, every failure inside the
/// pipeline is logged and counted instead of returned.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The connection string is missing a required part or could not be parsed.
    #[error("invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },

    /// A configuration value could not be interpreted.
    #[error("invalid value {value:?} for configuration key {key}")]
    InvalidConfig { key: String, value: String },

    /// The client was built outside a tokio runtime, so the export worker
    /// cannot be spawned.
    #[error("a tokio runtime is required to start the export worker")]
    NoRuntime,
}

/// Result type alias for pipeline construction and configuration.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Error returned by a processor stage.
///
/// The processor chain catches these at its boundary: the item is dropped,
/// the failure is logged, and the caller never sees it.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The item is missing a field the stage needs.
    #[error("{kind} item is missing required field `{field}`")]
    Malformed {
        kind: TelemetryKind,
        field: &'static str,
    },

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Result type alias for processor stages.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Error returned by an export sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink has been shut down and no longer accepts items.
    #[error("sink is closed")]
    Closed,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Failed(err.into())
    }
}

/// Result type alias for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;
