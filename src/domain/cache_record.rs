// Per-series sample cache and its bounding rules
use super::error::ErrorKind;
use super::series::{days_before, Sample};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// In-memory samples for one series.
///
/// After every mutating call `samples` is strictly ascending by
/// millisecond timestamp with no duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub series_id: String,
    samples: Vec<Sample>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_persist_error: Option<ErrorKind>,
}

impl CacheRecord {
    pub fn new(series_id: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            samples: Vec::new(),
            last_fetch_at: None,
            last_persist_error: None,
        }
    }

    /// Build a record from samples in any order, applying the merge rules.
    pub fn from_samples(series_id: impl Into<String>, samples: Vec<Sample>) -> Self {
        let mut record = Self::new(series_id);
        record.merge(samples);
        record
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Merge `incoming` into the record. Existing samples are applied first,
    /// so an incoming sample replaces any existing one with the same
    /// millisecond timestamp. Applying the same batch twice is a no-op.
    pub fn merge(&mut self, incoming: Vec<Sample>) {
        let mut by_time: BTreeMap<i64, Sample> = BTreeMap::new();
        for sample in self.samples.drain(..).chain(incoming) {
            by_time.insert(sample.time_ms(), sample);
        }
        self.samples = by_time.into_values().collect();
    }

    /// Drop every sample at or before `now - retention_days`.
    pub fn prune(&mut self, now: DateTime<Utc>, retention_days: f64) -> usize {
        let cutoff = days_before(now, retention_days);
        let keep_from = self.samples.partition_point(|s| s.timestamp <= cutoff);
        self.samples.drain(..keep_from);
        keep_from
    }

    /// Keep only the newest `max_points` samples.
    pub fn cap(&mut self, max_points: usize) -> usize {
        if self.samples.len() <= max_points {
            return 0;
        }
        let excess = self.samples.len() - max_points;
        self.samples.drain(..excess);
        excess
    }

    /// Read-only projection of samples inside the display window.
    pub fn window(&self, now: DateTime<Utc>, display_window_days: f64) -> Vec<Sample> {
        let start = days_before(now, display_window_days);
        let from = self.samples.partition_point(|s| s.timestamp < start);
        self.samples[from..].to_vec()
    }

    /// The newest `n` samples, oldest first.
    pub fn newest(&self, n: usize) -> &[Sample] {
        let from = self.samples.len().saturating_sub(n);
        &self.samples[from..]
    }

    /// Merge, then prune and cap in one step.
    pub fn apply(
        &mut self,
        incoming: Vec<Sample>,
        now: DateTime<Utc>,
        retention_days: f64,
        max_points: usize,
    ) {
        self.merge(incoming);
        let pruned = self.prune(now, retention_days);
        let evicted = self.cap(max_points);
        if pruned > 0 || evicted > 0 {
            tracing::debug!(
                "Series {}: pruned {} expired, evicted {} oldest, {} retained",
                self.series_id,
                pruned,
                evicted,
                self.samples.len()
            );
        }
    }
}
