use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;

/// One finished ingestion attempt.
#[derive(Debug, Clone)]
pub struct MetricSample {
    /// Declared extension, or `unknown` when the name had none.
    pub file_type: String,
    pub size_bytes: u64,
    pub duration: Duration,
    pub succeeded: bool,
    pub cache_hit: bool,
}

#[derive(Debug, Default)]
struct RunningSummary {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl RunningSummary {
    fn observe(&mut self, value: f64) {
        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    total_processed: u64,
    total_failed: u64,
    cache_hits: u64,
    durations_ms: RunningSummary,
    sizes_bytes: RunningSummary,
    file_types: BTreeMap<String, u64>,
}

/// Aggregated view returned by [`MetricsCollector::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub cache_hits: u64,
    pub avg_processing_time_ms: f64,
    pub min_processing_time_ms: f64,
    pub max_processing_time_ms: f64,
    pub avg_file_size_bytes: f64,
    pub file_type_distribution: BTreeMap<String, u64>,
}

/// Process-wide counters for ingestion attempts. Memory stays proportional to the number of
/// distinct file types, not the number of documents.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record(&self, sample: &MetricSample) {
        let mut state = self.lock();
        if sample.succeeded {
            state.total_processed = state.total_processed.saturating_add(1);
        } else {
            state.total_failed = state.total_failed.saturating_add(1);
        }
        if sample.cache_hit {
            state.cache_hits = state.cache_hits.saturating_add(1);
        }
        state
            .durations_ms
            .observe(sample.duration.as_secs_f64() * 1_000.0);
        state.sizes_bytes.observe(sample.size_bytes as f64);
        let seen = state
            .file_types
            .entry(sample.file_type.clone())
            .or_default();
        *seen = seen.saturating_add(1);
    }

    pub fn statistics(&self) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            total_processed: state.total_processed,
            total_failed: state.total_failed,
            cache_hits: state.cache_hits,
            avg_processing_time_ms: state.durations_ms.mean(),
            min_processing_time_ms: state.durations_ms.min.unwrap_or_default(),
            max_processing_time_ms: state.durations_ms.max.unwrap_or_default(),
            avg_file_size_bytes: state.sizes_bytes.mean(),
            file_type_distribution: state.file_types.clone(),
        }
    }

    // Poisoning is ignored; counters stay usable after a panicking writer.
    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn sample(file_type: &str, size: u64, ms: u64, succeeded: bool) -> MetricSample {
        MetricSample {
            file_type: file_type.into(),
            size_bytes: size,
            duration: Duration::from_millis(ms),
            succeeded,
            cache_hit: false,
        }
    }

    #[test]
    fn empty_collector_reports_zeroes() {
        let snapshot = MetricsCollector::new().statistics();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert!(snapshot.avg_processing_time_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn means_and_distribution_are_derived_from_samples() {
        let metrics = MetricsCollector::new();
        metrics.record(&sample("pdf", 1_000, 10, true));
        metrics.record(&sample("pdf", 3_000, 30, false));
        metrics.record(&MetricSample {
            cache_hit: true,
            ..sample("txt", 2_000, 20, true)
        });

        let snapshot = metrics.statistics();
        assert_eq!(snapshot.total_processed, 2);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert!((snapshot.avg_processing_time_ms - 20.0).abs() < 1e-9);
        assert!((snapshot.min_processing_time_ms - 10.0).abs() < 1e-9);
        assert!((snapshot.max_processing_time_ms - 30.0).abs() < 1e-9);
        assert!((snapshot.avg_file_size_bytes - 2_000.0).abs() < 1e-9);
        assert_eq!(snapshot.file_type_distribution.get("pdf"), Some(&2));
        assert_eq!(snapshot.file_type_distribution.get("txt"), Some(&1));
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let metrics = Arc::new(MetricsCollector::new());
        let threads: Vec<_> = (0..8)
            .map(|worker| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        metrics.record(&sample("txt", 10, 1, (worker + i) % 5 != 0));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("writer thread");
        }

        let snapshot = metrics.statistics();
        assert_eq!(snapshot.total_processed + snapshot.total_failed, 2_000);
        assert_eq!(snapshot.file_type_distribution.get("txt"), Some(&2_000));
    }
}
