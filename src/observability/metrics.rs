//! In-process job metrics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event count.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Upper bounds (ms) of the window latency buckets. Allocation queries for a
/// month routinely take seconds.
pub const WINDOW_LATENCY_BOUNDS_MS: [u64; 7] = [100, 500, 1_000, 5_000, 15_000, 60_000, 300_000];

/// Latency distribution in whole milliseconds. The last bucket collects
/// everything above the highest bound.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<u64>,
    buckets: Vec<AtomicU64>,
    total_ms: AtomicU64,
}

impl Histogram {
    /// `bounds` must be ascending.
    pub fn new(bounds: &[u64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            buckets: std::iter::repeat_with(AtomicU64::default)
                .take(bounds.len() + 1)
                .collect(),
            total_ms: AtomicU64::new(0),
        }
    }

    pub fn window_latency() -> Self {
        Self::new(&WINDOW_LATENCY_BOUNDS_MS)
    }

    pub fn observe(&self, latency_ms: f64) {
        let ms = latency_ms.max(0.0).round() as u64;
        let idx = self.bounds.partition_point(|&bound| bound < ms);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn count(&self) -> u64 {
        self.bucket_counts().iter().sum()
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ms.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.total_ms() as f64 / n as f64,
        }
    }
}

/// Counters for one billing process.
#[derive(Debug)]
pub struct BillingMetrics {
    pub windows_built: Counter,
    pub window_failures: Counter,
    pub trees_built: Counter,
    pub snapshots_written: Counter,
    pub snapshot_failures: Counter,
    pub factor_queries: Counter,
    pub undefined_factors: Counter,
    pub window_latency_ms: Histogram,
}

impl BillingMetrics {
    pub fn new() -> Self {
        Self {
            windows_built: Counter::new(),
            window_failures: Counter::new(),
            trees_built: Counter::new(),
            snapshots_written: Counter::new(),
            snapshot_failures: Counter::new(),
            factor_queries: Counter::new(),
            undefined_factors: Counter::new(),
            window_latency_ms: Histogram::window_latency(),
        }
    }

    pub fn record_window(&self, success: bool, trees: usize, latency_ms: f64) {
        self.window_latency_ms.observe(latency_ms);
        if success {
            self.windows_built.inc();
            self.trees_built.add(trees as u64);
        } else {
            self.window_failures.inc();
        }
    }

    pub fn record_snapshot(&self, success: bool) {
        if success {
            self.snapshots_written.inc();
        } else {
            self.snapshot_failures.inc();
        }
    }

    /// Counts one resolved factor value; `undefined` when the backend returned NaN or an infinity.
    pub fn record_factor(&self, undefined: bool) {
        self.factor_queries.inc();
        if undefined {
            self.undefined_factors.inc();
        }
    }
}

impl Default for BillingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BillingMetrics`] for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub windows_built: u64,
    pub window_failures: u64,
    pub trees_built: u64,
    pub snapshots_written: u64,
    pub snapshot_failures: u64,
    pub factor_queries: u64,
    pub undefined_factors: u64,
    pub avg_window_latency_ms: f64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &BillingMetrics) -> Self {
        Self {
            windows_built: metrics.windows_built.get(),
            window_failures: metrics.window_failures.get(),
            trees_built: metrics.trees_built.get(),
            snapshots_written: metrics.snapshots_written.get(),
            snapshot_failures: metrics.snapshot_failures.get(),
            factor_queries: metrics.factor_queries.get(),
            undefined_factors: metrics.undefined_factors.get(),
            avg_window_latency_ms: metrics.window_latency_ms.mean_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_histogram_buckets() {
        let hist = Histogram::new(&[10, 50]);
        hist.observe(5.0);
        hist.observe(10.0);
        hist.observe(25.4);
        hist.observe(75.0);
        assert_eq!(hist.count(), 4);
        assert_eq!(hist.bucket_counts(), vec![2, 1, 1]);
        assert_eq!(hist.total_ms(), 115);
        assert_eq!(hist.mean_ms(), 28.75);
    }

    #[test]
    fn test_histogram_empty_mean() {
        assert_eq!(Histogram::window_latency().mean_ms(), 0.0);
    }

    #[test]
    fn test_summary() {
        let metrics = BillingMetrics::new();
        metrics.record_window(true, 3, 200.0);
        metrics.record_window(false, 0, 400.0);
        metrics.record_snapshot(true);
        metrics.record_snapshot(true);
        metrics.record_snapshot(false);
        metrics.record_factor(false);
        metrics.record_factor(true);

        let summary = MetricsSummary::from_metrics(&metrics);
        assert_eq!(summary.windows_built, 1);
        assert_eq!(summary.window_failures, 1);
        assert_eq!(summary.trees_built, 3);
        assert_eq!(summary.snapshots_written, 2);
        assert_eq!(summary.snapshot_failures, 1);
        assert_eq!(summary.factor_queries, 2);
        assert_eq!(summary.undefined_factors, 1);
        assert_eq!(summary.avg_window_latency_ms, 300.0);
    }
}
