//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every recording operation. Reporting swaps the periodic
//! counters to zero; monotonic counters are only loaded.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only;
//! session exclusion lives in `SessionGate`, never here.

use crate::domain::types::{FailureReason, RecognitionResult, SessionOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Qualifying presses seen (monotonic)
    presses_total: AtomicU64,
    /// Presses dropped because a session was in flight (monotonic)
    presses_dropped_busy: AtomicU64,
    /// Sessions completed (monotonic)
    sessions_total: AtomicU64,
    identified_total: AtomicU64,
    no_match_total: AtomicU64,
    no_face_total: AtomicU64,
    invalid_image_total: AtomicU64,
    service_error_total: AtomicU64,
    camera_unavailable_total: AtomicU64,
    /// Unlock sequences completed (monotonic)
    unlocks_total: AtomicU64,
    speech_errors_total: AtomicU64,
    /// 1 while a session is in flight
    busy: AtomicU64,
    /// Recognition latency histogram (reset on report)
    recognition_buckets: [AtomicU64; NUM_BUCKETS],
    recognition_sum_ms: AtomicU64,
    recognition_max_ms: AtomicU64,
    recognitions_since_report: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            presses_total: AtomicU64::new(0),
            presses_dropped_busy: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            identified_total: AtomicU64::new(0),
            no_match_total: AtomicU64::new(0),
            no_face_total: AtomicU64::new(0),
            invalid_image_total: AtomicU64::new(0),
            service_error_total: AtomicU64::new(0),
            camera_unavailable_total: AtomicU64::new(0),
            unlocks_total: AtomicU64::new(0),
            speech_errors_total: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            recognition_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            recognition_sum_ms: AtomicU64::new(0),
            recognition_max_ms: AtomicU64::new(0),
            recognitions_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_press(&self) {
        self.presses_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_press_dropped(&self) {
        self.presses_dropped_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(u64::from(busy), Ordering::Relaxed);
    }

    /// Record one recognition run and its latency
    pub fn record_recognition(&self, result: &RecognitionResult, latency_ms: u64) {
        let counter = match result {
            RecognitionResult::Identified(_) => &self.identified_total,
            RecognitionResult::NoMatch => &self.no_match_total,
            RecognitionResult::Failure(FailureReason::NoFaceDetected) => &self.no_face_total,
            RecognitionResult::Failure(FailureReason::InvalidImage) => &self.invalid_image_total,
            RecognitionResult::Failure(FailureReason::ServiceError) => &self.service_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.recognitions_since_report.fetch_add(1, Ordering::Relaxed);
        self.recognition_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.recognition_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.recognition_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_session(&self, outcome: SessionOutcome) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
        if outcome == SessionOutcome::CameraUnavailable {
            self.camera_unavailable_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_unlock(&self) {
        self.unlocks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_speech_error(&self) {
        self.speech_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn presses_total(&self) -> u64 {
        self.presses_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn presses_dropped_busy(&self) -> u64 {
        self.presses_dropped_busy.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sessions_total(&self) -> u64 {
        self.sessions_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unlocks_total(&self) -> u64 {
        self.unlocks_total.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the periodic histogram
    pub fn report(&self) -> MetricsSummary {
        let recognitions = self.recognitions_since_report.swap(0, Ordering::Relaxed);
        let recognition_sum = self.recognition_sum_ms.swap(0, Ordering::Relaxed);
        let recognition_max = self.recognition_max_ms.swap(0, Ordering::Relaxed);
        let recognition_buckets = swap_buckets(&self.recognition_buckets);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed.as_secs()
        };

        let recognition_avg_ms =
            if recognitions > 0 { recognition_sum / recognitions } else { 0 };

        MetricsSummary {
            interval_secs: elapsed_secs,
            presses_total: self.presses_total.load(Ordering::Relaxed),
            presses_dropped_busy: self.presses_dropped_busy.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            identified_total: self.identified_total.load(Ordering::Relaxed),
            no_match_total: self.no_match_total.load(Ordering::Relaxed),
            no_face_total: self.no_face_total.load(Ordering::Relaxed),
            invalid_image_total: self.invalid_image_total.load(Ordering::Relaxed),
            service_error_total: self.service_error_total.load(Ordering::Relaxed),
            camera_unavailable_total: self.camera_unavailable_total.load(Ordering::Relaxed),
            unlocks_total: self.unlocks_total.load(Ordering::Relaxed),
            speech_errors_total: self.speech_errors_total.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            recognitions,
            recognition_buckets,
            recognition_avg_ms,
            recognition_max_ms: recognition_max,
            recognition_p95_ms: percentile_from_buckets(&recognition_buckets, 0.95),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub interval_secs: u64,
    pub presses_total: u64,
    pub presses_dropped_busy: u64,
    pub sessions_total: u64,
    pub identified_total: u64,
    pub no_match_total: u64,
    pub no_face_total: u64,
    pub invalid_image_total: u64,
    pub service_error_total: u64,
    pub camera_unavailable_total: u64,
    pub unlocks_total: u64,
    pub speech_errors_total: u64,
    /// 1 while a session is in flight
    pub busy: u64,
    /// Recognitions since the previous report
    pub recognitions: u64,
    /// Recognition latency histogram buckets (ms)
    pub recognition_buckets: [u64; NUM_BUCKETS],
    pub recognition_avg_ms: u64,
    pub recognition_max_ms: u64,
    pub recognition_p95_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            presses = %self.presses_total,
            dropped_busy = %self.presses_dropped_busy,
            sessions = %self.sessions_total,
            identified = %self.identified_total,
            no_match = %self.no_match_total,
            no_face = %self.no_face_total,
            service_errors = %self.service_error_total,
            unlocks = %self.unlocks_total,
            recognitions = %self.recognitions,
            recognition_avg_ms = %self.recognition_avg_ms,
            recognition_p95_ms = %self.recognition_p95_ms,
            "metrics"
        );
    }
}
