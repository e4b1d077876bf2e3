//! Metrics for the logical queue index
//!
//! Uses the `metrics` crate facade; install any recorder (for example the
//! Prometheus exporter in the broker binary) to collect them.
//!
//! All metrics follow the pattern: `rivven_queue_index_{name}_{unit}`

use std::time::{Duration, Instant};

/// Queue index metrics
pub struct QueueIndexMetrics;

impl QueueIndexMetrics {
    // ---- Counters ----

    /// Index records written by `put_index`
    pub fn increment_records_indexed() {
        metrics::counter!("rivven_queue_index_records_indexed_total").increment(1);
    }

    /// `put_index` calls skipped because the physical offset was already indexed
    pub fn increment_replays_skipped() {
        metrics::counter!("rivven_queue_index_replays_skipped_total").increment(1);
    }

    /// Blank records written to align a queue that starts past zero
    pub fn add_gap_fill_records(count: u64) {
        metrics::counter!("rivven_queue_index_gap_fill_records_total").increment(count);
    }

    /// Writes whose logical position disagreed with the segment write cursor
    pub fn increment_order_warnings() {
        metrics::counter!("rivven_queue_index_order_warnings_total").increment(1);
    }

    /// Appends rejected by the segment layer
    pub fn increment_append_failures() {
        metrics::counter!("rivven_queue_index_append_failures_total").increment(1);
    }

    /// Segments dropped while repairing a truncated physical log
    pub fn increment_segments_truncated() {
        metrics::counter!("rivven_queue_index_segments_truncated_total").increment(1);
    }

    /// Segments dropped by retention
    pub fn add_segments_expired(count: u64) {
        metrics::counter!("rivven_queue_index_segments_expired_total").increment(count);
    }

    /// Time lookups that hit a record the physical log no longer holds
    pub fn increment_unresolvable_lookups() {
        metrics::counter!("rivven_queue_index_unresolvable_lookups_total").increment(1);
    }

    // ---- Gauges ----

    /// Queue offset bounds (per topic/partition)
    pub fn set_queue_offsets(topic: &str, partition: u32, min: i64, max: i64) {
        metrics::gauge!(
            "rivven_queue_index_min_offset",
            "topic" => topic.to_string(),
            "partition" => partition.to_string()
        )
        .set(min as f64);
        metrics::gauge!(
            "rivven_queue_index_max_offset",
            "topic" => topic.to_string(),
            "partition" => partition.to_string()
        )
        .set(max as f64);
    }

    // ---- Histograms ----

    /// Record recovery duration in microseconds
    pub fn record_recovery_latency_us(us: u64) {
        metrics::histogram!("rivven_queue_index_recovery_latency_seconds")
            .record(us as f64 / 1_000_000.0);
    }

    /// Record time lookup duration in microseconds
    pub fn record_time_lookup_latency_us(us: u64) {
        metrics::histogram!("rivven_queue_index_time_lookup_latency_seconds")
            .record(us as f64 / 1_000_000.0);
    }
}

/// Timer for measuring operation durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Get elapsed Duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
