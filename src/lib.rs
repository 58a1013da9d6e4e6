//! Telemetry pipeline for a serverless HTTP function.
//!
//! Items reported through a [`TelemetryClient`] are enriched by an
//! [`InitializerChain`], filtered and sampled by a [`ProcessorChain`], and
//! exported in batches to a [`TelemetrySink`] by a background worker.

mod channel;
mod client;
mod config;
mod connection;
mod error;
mod initializer;
mod item;
mod live;
mod processor;
mod sampling;
mod sink;

pub mod instrumentation;

// Re-export public API
pub use channel::{ExportOptions, FlushOutcome};
pub use client::{TelemetryClient, TelemetryClientBuilder};
pub use config::PipelineConfig;
pub use connection::{ConnectionString, DEFAULT_INGESTION_ENDPOINT};
pub use error::{
    ProcessError, ProcessResult, SinkError, SinkResult, TelemetryError, TelemetryResult,
};
pub use initializer::{
    CloudRoleInitializer, DEFAULT_DEPENDENCY_SUCCESS_THRESHOLD, DependencySuccessInitializer,
    DeploymentEnvironment, ENVIRONMENT_PROPERTY, EnvironmentInitializer, InitializerChain,
    TelemetryInitializer, VersionInitializer,
};
pub use item::{
    DependencyTelemetry, EventTelemetry, ExceptionTelemetry, MetricTelemetry, RequestTelemetry,
    SeverityLevel, TelemetryContext, TelemetryData, TelemetryItem, TelemetryKind, TraceTelemetry,
};
pub use live::{LiveMetricsStream, LiveSample, LiveSnapshot};
pub use processor::{
    FnProcessor, Flow, KindFilter, KindFilterMode, LiveMetricsProcessor, ProcessorChain,
    TelemetryProcessor,
};
pub use sampling::{SamplingProcessor, is_sampled_in, sampling_score};
pub use sink::{InMemorySink, LogSink, NullSink, TelemetrySink};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
