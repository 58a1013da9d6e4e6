//! Self-instrumentation for the pipeline.
//!
//! This module provides:
//! - Metric recording helpers (backend-agnostic via the `metrics` crate)
//! - Logging setup for the host process, with an optional Prometheus endpoint
//! - W3C Trace Context extraction for deriving operation ids
//!
//! # Usage
//!
//! The pipeline emits `tracing` events and `metrics` measurements whether or
//! not anything is installed to receive them. Call [`LoggingBuilder::build`]
//! once at process start, or install your own subscriber and recorder.

mod logging;
mod metrics;
mod propagation;

pub use logging::{LoggingBuilder, LoggingError, LoggingHandle};
pub use metrics::*;
pub use propagation::{TRACEPARENT_HEADER, has_trace_context, operation_id_from_headers};
