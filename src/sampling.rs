//! Percentage sampling keyed on the operation id.
//!
//! Items that share an operation id always get the same decision, so a request
//! and its dependencies are kept or dropped together. Items without an
//! operation id are decided independently.

use crate::error::ProcessResult;
use crate::instrumentation::DropReason;
use crate::item::TelemetryItem;
use crate::processor::{Flow, TelemetryProcessor};

/// Inputs shorter than this are repeated before hashing so that short ids
/// still spread across the score range.
const MIN_HASH_INPUT_LEN: usize = 8;

/// Maps a sampling key to a score in `[0, 100]`.
///
/// djb2 over the UTF-16 code units of the key, with 32-bit wrapping
/// arithmetic, scaled by `i32::MAX`. The same key always yields the same
/// score, on every host.
pub fn sampling_score(key: &str) -> f64 {
    if key.is_empty() {
        return 0.0;
    }

    let mut input = key.to_string();
    while input.len() < MIN_HASH_INPUT_LEN {
        input.push_str(key);
    }

    let mut hash: i32 = 5381;
    for unit in input.encode_utf16() {
        hash = (hash << 5).wrapping_add(hash).wrapping_add(i32::from(unit));
    }

    (f64::from(hash.unsigned_abs()) / f64::from(i32::MAX) * 100.0).min(100.0)
}

/// Whether an item keyed by `key` is kept at `percentage`.
pub fn is_sampled_in(key: &str, percentage: f64) -> bool {
    if percentage >= 100.0 {
        return true;
    }
    if percentage <= 0.0 {
        return false;
    }
    sampling_score(key) < percentage
}

/// Keeps roughly `percentage` percent of items.
///
/// At 100 every item is forwarded; at 0 none are. Forwarded items carry the
/// percentage in `context.sample_rate`.
#[derive(Debug, Clone)]
pub struct SamplingProcessor {
    percentage: f64,
}

impl Default for SamplingProcessor {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl SamplingProcessor {
    /// Creates a sampler; the percentage is clamped to `[0, 100]`. NaN is
    /// treated as 100.
    pub fn new(percentage: f64) -> Self {
        let percentage = if percentage.is_nan() {
            100.0
        } else {
            percentage.clamp(0.0, 100.0)
        };
        Self { percentage }
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    fn keeps(&self, item: &TelemetryItem) -> bool {
        if self.percentage >= 100.0 {
            return true;
        }
        if self.percentage <= 0.0 {
            return false;
        }
        match item.context.operation_id.as_deref() {
            Some(operation_id) if !operation_id.is_empty() => {
                is_sampled_in(operation_id, self.percentage)
            }
            _ => is_sampled_in(&uuid::Uuid::new_v4().to_string(), self.percentage),
        }
    }
}

impl TelemetryProcessor for SamplingProcessor {
    fn name(&self) -> &str {
        "sampling"
    }

    fn process(&self, mut item: TelemetryItem) -> ProcessResult<Flow> {
        if !self.keeps(&item) {
            return Ok(Flow::Drop);
        }
        item.context.sample_rate = Some(self.percentage);
        Ok(Flow::Forward(item))
    }

    fn drop_reason(&self) -> DropReason {
        DropReason::Sampled
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::item::{DependencyTelemetry, RequestTelemetry, TraceTelemetry};
    use std::time::Duration;

    fn traces(n: usize) -> impl Iterator<Item = TelemetryItem> {
        (0..n).map(|i| TelemetryItem::new(TraceTelemetry::new(format!("trace {i}"))))
    }

    #[test]
    fn test_full_rate_forwards_all() {
        let sampler = SamplingProcessor::new(100.0);
        let forwarded = traces(500)
            .filter_map(|item| match sampler.process(item).unwrap() {
                Flow::Forward(item) => Some(item),
                Flow::Drop => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(forwarded.len(), 500);
        assert!(forwarded.iter().all(|i| i.context.sample_rate == Some(100.0)));
    }

    #[test]
    fn test_zero_rate_forwards_none() {
        let sampler = SamplingProcessor::new(0.0);
        let forwarded = traces(500)
            .map(|item| sampler.process(item).unwrap())
            .filter(|flow| matches!(flow, Flow::Forward(_)))
            .count();
        assert_eq!(forwarded, 0);
    }

    #[test]
    fn test_bounds_decide_without_operation_id() {
        let item = TelemetryItem::new(TraceTelemetry::new("no operation"));
        assert!(item.context.operation_id.is_none());
        assert!(SamplingProcessor::new(100.0).keeps(&item));
        assert!(!SamplingProcessor::new(0.0).keeps(&item));
    }

    #[test]
    fn test_same_operation_same_decision() {
        let sampler = SamplingProcessor::new(50.0);
        for op in 0..200 {
            let operation_id = format!("op-{op}");
            let request = TelemetryItem::new(RequestTelemetry::new(
                "HttpTrigger1",
                "/api/HttpTrigger1",
                Duration::from_millis(3),
                200,
            ))
            .with_operation_id(&operation_id);
            let dependency = TelemetryItem::new(DependencyTelemetry::new(
                "upload",
                "blob",
                Duration::from_millis(3),
                true,
            ))
            .with_operation_id(&operation_id);

            let kept_request = matches!(sampler.process(request).unwrap(), Flow::Forward(_));
            let kept_dependency =
                matches!(sampler.process(dependency).unwrap(), Flow::Forward(_));
            assert_eq!(kept_request, kept_dependency, "operation {operation_id}");
        }
    }

    #[test]
    fn test_partial_rate_is_roughly_proportional() {
        let kept = (0..10_000)
            .filter(|_| is_sampled_in(&uuid::Uuid::new_v4().simple().to_string(), 25.0))
            .count();
        assert!((1_000..4_000).contains(&kept), "kept {kept}");
    }

    #[test]
    fn test_score_is_deterministic_and_bounded() {
        let a = sampling_score("0af7651916cd43dd8448eb211c80319c");
        let b = sampling_score("0af7651916cd43dd8448eb211c80319c");
        assert_eq!(a, b);
        assert!((0.0..=100.0).contains(&a));
        assert_eq!(sampling_score(""), 0.0);
        assert!((0.0..=100.0).contains(&sampling_score("ab")));
    }

    #[test]
    fn test_percentage_is_clamped() {
        assert_eq!(SamplingProcessor::new(150.0).percentage(), 100.0);
        assert_eq!(SamplingProcessor::new(-5.0).percentage(), 0.0);
        assert_eq!(SamplingProcessor::new(f64::NAN).percentage(), 100.0);
    }
}
