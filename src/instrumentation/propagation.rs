//! W3C Trace Context extraction for correlating telemetry with the caller.
//!
//! The HTTP handler receives a `traceparent` header from upstream callers:
//! `traceparent: 00-{trace_id}-{span_id}-{flags}`
//!
//! The trace id becomes the operation id of every item tracked for that
//! request, so the request and its dependencies share a sampling decision.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;

/// Header carrying the W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Wrapper to implement `Extractor` for HashMap<String, String>
///
/// Header names are matched case-insensitively.
struct HeaderExtractor<'a>(&'a HashMap<String, String>);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(|s| s.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Extract the operation id from incoming request headers.
///
/// Returns the 32-character hex trace id of a valid `traceparent` header, or
/// `None` when the header is missing or malformed.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use function_telemetry::instrumentation::operation_id_from_headers;
///
/// let headers = HashMap::from([(
///     "traceparent".to_string(),
///     "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
/// )]);
/// assert_eq!(
///     operation_id_from_headers(&headers).as_deref(),
///     Some("0af7651916cd43dd8448eb211c80319c"),
/// );
/// ```
pub fn operation_id_from_headers(headers: &HashMap<String, String>) -> Option<String> {
    let propagator = TraceContextPropagator::new();
    let cx = propagator.extract(&HeaderExtractor(headers));
    let span = cx.span();
    let span_context = span.span_context();

    if !span_context.is_valid() || span_context.trace_id() == TraceId::INVALID {
        return None;
    }
    Some(span_context.trace_id().to_string())
}

/// Check if headers contain a trace context header.
pub fn has_trace_context(headers: &HashMap<String, String>) -> bool {
    HeaderExtractor(headers).get(TRACEPARENT_HEADER).is_some()
}
