//! In-memory rolling view of recent telemetry for a live dashboard.
//!
//! The window is bounded twice: by sample count (oldest evicted first) and by
//! age (samples older than `max_age` are evicted on every append and
//! snapshot). It is the only shared mutable state on the `track*` path.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::item::{TelemetryData, TelemetryItem, TelemetryKind};

pub const DEFAULT_LIVE_CAPACITY: usize = 1024;
pub const DEFAULT_LIVE_WINDOW: Duration = Duration::from_secs(60);

/// What the window keeps about one item. No properties or payload text
/// beyond the display name.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSample {
    pub kind: TelemetryKind,
    pub name: String,
    pub recorded_at: Instant,
    pub duration: Option<Duration>,
    pub success: Option<bool>,
}

impl LiveSample {
    pub fn from_item(item: &TelemetryItem, recorded_at: Instant) -> Self {
        let (duration, success) = match &item.data {
            TelemetryData::Request(request) => (Some(request.duration), Some(request.success)),
            TelemetryData::Dependency(dependency) => {
                (Some(dependency.duration), Some(dependency.success))
            }
            _ => (None, None),
        };
        Self {
            kind: item.kind(),
            name: item.data.name().to_string(),
            recorded_at,
            duration,
            success,
        }
    }
}

/// Aggregates over the current window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    /// Samples currently in the window.
    pub window_len: usize,
    /// Samples ever recorded.
    pub recorded_total: u64,
    /// Samples evicted by capacity or age.
    pub evicted_total: u64,
    pub counts: BTreeMap<TelemetryKind, u64>,
    pub failed_requests: u64,
    pub failed_dependencies: u64,
    pub avg_request_duration: Option<Duration>,
    pub avg_dependency_duration: Option<Duration>,
}

impl LiveSnapshot {
    pub fn count(&self, kind: TelemetryKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Computes aggregates over a window of samples.
pub fn compute_snapshot(samples: &VecDeque<LiveSample>) -> LiveSnapshot {
    let mut snap = LiveSnapshot {
        window_len: samples.len(),
        ..Default::default()
    };

    // Nanosecond sums cannot overflow u128 for any window of `Duration`s.
    let mut request_total: u128 = 0;
    let mut request_count: u128 = 0;
    let mut dependency_total: u128 = 0;
    let mut dependency_count: u128 = 0;

    for sample in samples {
        *snap.counts.entry(sample.kind).or_insert(0) += 1;

        match sample.kind {
            TelemetryKind::Request => {
                if sample.success == Some(false) {
                    snap.failed_requests += 1;
                }
                if let Some(duration) = sample.duration {
                    request_total += duration.as_nanos();
                    request_count += 1;
                }
            }
            TelemetryKind::Dependency => {
                if sample.success == Some(false) {
                    snap.failed_dependencies += 1;
                }
                if let Some(duration) = sample.duration {
                    dependency_total += duration.as_nanos();
                    dependency_count += 1;
                }
            }
            _ => {}
        }
    }

    snap.avg_request_duration = average(request_total, request_count);
    snap.avg_dependency_duration = average(dependency_total, dependency_count);

    snap
}

fn average(total_nanos: u128, count: u128) -> Option<Duration> {
    if count == 0 {
        return None;
    }
    let avg = total_nanos / count;
    let secs = u64::try_from(avg / 1_000_000_000).unwrap_or(u64::MAX);
    Some(Duration::new(secs, (avg % 1_000_000_000) as u32))
}

/// Shared, concurrency-safe rolling window of recent items.
///
/// `recorded_total == evicted_total + window_len` holds whenever no append is
/// in progress: both counters are updated under the window lock.
#[derive(Debug)]
pub struct LiveMetricsStream {
    capacity: usize,
    max_age: Duration,
    window: Mutex<VecDeque<LiveSample>>,
    recorded: AtomicU64,
    evicted: AtomicU64,
}

impl Default for LiveMetricsStream {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_CAPACITY, DEFAULT_LIVE_WINDOW)
    }
}

impl LiveMetricsStream {
    /// Creates a window holding at most `capacity` samples (minimum 1) no
    /// older than `max_age`.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            max_age,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            recorded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, item: &TelemetryItem) {
        self.record_sample(LiveSample::from_item(item, Instant::now()));
    }

    pub fn record_sample(&self, sample: LiveSample) {
        let now = sample.recorded_at;
        let mut window = self.lock();

        let mut evicted = self.evict_expired(&mut window, now);
        while window.len() >= self.capacity {
            window.pop_front();
            evicted += 1;
        }
        window.push_back(sample);

        self.recorded.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        let mut window = self.lock();
        let evicted = self.evict_expired(&mut window, Instant::now());
        if evicted > 0 {
            self.evicted.fetch_add(evicted, Ordering::Relaxed);
        }

        let mut snap = compute_snapshot(&window);
        snap.recorded_total = self.recorded.load(Ordering::Relaxed);
        snap.evicted_total = self.evicted.load(Ordering::Relaxed);
        snap
    }

    /// The most recent `limit` samples, newest last.
    pub fn recent(&self, limit: usize) -> Vec<LiveSample> {
        let window = self.lock();
        let skip = window.len().saturating_sub(limit);
        window.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        let mut window = self.lock();
        let dropped = window.len() as u64;
        window.clear();
        self.evicted.fetch_add(dropped, Ordering::Relaxed);
    }

    fn evict_expired(&self, window: &mut VecDeque<LiveSample>, now: Instant) -> u64 {
        let mut evicted = 0;
        while let Some(front) = window.front() {
            if now.saturating_duration_since(front.recorded_at) <= self.max_age {
                break;
            }
            window.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LiveSample>> {
        // A panic while holding the lock leaves the deque structurally valid.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
