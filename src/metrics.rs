use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder,
};
use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::Duration;

pub static REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_requests_total",
        "Total number of requests seen by the pipeline"
    ))
    .unwrap()
});

pub static ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_errors_total",
        "Total number of responses with status >= 400"
    ))
    .unwrap()
});

pub static REQUEST_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "gateway_request_duration_seconds",
        "Histogram of request durations"
    )
    .unwrap()
});

/// Renders all registered metrics in Prometheus text format.
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

struct CollectorState {
    total_requests: u64,
    total_errors: u64,
    status_counts: HashMap<u16, u64>,
    latencies: VecDeque<Duration>,
}

/// In-process latency and status collector.
///
/// Keeps totals, a per-status histogram, and a bounded FIFO of the most
/// recent latencies. Quantiles are computed on demand from a sorted copy of
/// the window. `record` takes the exclusive lock; `snapshot` the shared one.
pub struct MetricsCollector {
    state: RwLock<CollectorState>,
    window: usize,
}

/// Point-in-time stats, as served by the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub status_counts: HashMap<u16, u64>,
}

impl MetricsCollector {
    pub fn new(window: usize) -> Self {
        Self {
            state: RwLock::new(CollectorState {
                total_requests: 0,
                total_errors: 0,
                status_counts: HashMap::new(),
                latencies: VecDeque::with_capacity(window),
            }),
            window,
        }
    }

    pub fn record(&self, duration: Duration, status: u16) {
        REQUESTS_TOTAL.inc();
        if status >= 400 {
            ERRORS_TOTAL.inc();
        }
        REQUEST_DURATION_SECONDS.observe(duration.as_secs_f64());

        let mut state = self.state.write().expect("metrics lock poisoned");
        state.total_requests += 1;
        if status >= 400 {
            state.total_errors += 1;
        }
        *state.status_counts.entry(status).or_insert(0) += 1;

        if state.latencies.len() == self.window {
            state.latencies.pop_front();
        }
        state.latencies.push_back(duration);
    }

    pub fn snapshot(&self) -> Stats {
        let state = self.state.read().expect("metrics lock poisoned");

        let mut sorted: Vec<Duration> = state.latencies.iter().copied().collect();
        sorted.sort_unstable();

        let error_rate = if state.total_requests > 0 {
            state.total_errors as f64 / state.total_requests as f64
        } else {
            0.0
        };

        Stats {
            total_requests: state.total_requests,
            total_errors: state.total_errors,
            error_rate,
            p50_latency_ms: quantile_ms(&sorted, 0.50),
            p95_latency_ms: quantile_ms(&sorted, 0.95),
            p99_latency_ms: quantile_ms(&sorted, 0.99),
            status_counts: state.status_counts.clone(),
        }
    }
}

/// Index at `floor(len * q)`, clamped to the last element.
fn quantile_ms(sorted: &[Duration], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q) as usize).min(sorted.len() - 1);
    sorted[idx].as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_status_counts() {
        let collector = MetricsCollector::new(100);
        collector.record(Duration::from_millis(10), 200);
        collector.record(Duration::from_millis(20), 200);
        collector.record(Duration::from_millis(30), 404);
        collector.record(Duration::from_millis(40), 500);

        let stats = collector.snapshot();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.error_rate, 0.5);
        assert_eq!(stats.status_counts[&200], 2);
        assert_eq!(stats.status_counts[&404], 1);
        assert_eq!(stats.status_counts[&500], 1);
    }

    #[test]
    fn quantiles_are_ordered_and_bounded_by_max() {
        let collector = MetricsCollector::new(1000);
        for i in 1..=200u64 {
            collector.record(Duration::from_millis(i), 200);
        }

        let stats = collector.snapshot();
        assert!(stats.p50_latency_ms <= stats.p95_latency_ms);
        assert!(stats.p95_latency_ms <= stats.p99_latency_ms);
        assert!(stats.p99_latency_ms <= 200.0);
        assert!(stats.p50_latency_ms >= 1.0);
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let collector = MetricsCollector::new(10);
        // Fill with slow samples, then push them out with fast ones.
        for _ in 0..10 {
            collector.record(Duration::from_millis(1000), 200);
        }
        for _ in 0..10 {
            collector.record(Duration::from_millis(1), 200);
        }

        let stats = collector.snapshot();
        assert!(stats.p99_latency_ms <= 1.5);
        // Totals are unaffected by the window.
        assert_eq!(stats.total_requests, 20);
    }

    #[test]
    fn empty_window_reports_zero() {
        let collector = MetricsCollector::new(10);
        let stats = collector.snapshot();
        assert_eq!(stats.p50_latency_ms, 0.0);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[test]
    fn single_sample_serves_every_quantile() {
        let collector = MetricsCollector::new(10);
        collector.record(Duration::from_millis(42), 200);

        let stats = collector.snapshot();
        assert_eq!(stats.p50_latency_ms, 42.0);
        assert_eq!(stats.p95_latency_ms, 42.0);
        assert_eq!(stats.p99_latency_ms, 42.0);
    }
}
