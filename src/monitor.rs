use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// Rolling buffer keeps only the most recent samples.
const MAX_SAMPLES: usize = 1000;
/// Reports aggregate over the trailing window.
const REPORT_WINDOW: Duration = Duration::from_secs(300);

/// Handle returned by `start_benchmark`, consumed by `end_benchmark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BenchmarkId(Uuid);

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkStats {
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub window_secs: u64,
    pub benchmarks: HashMap<String, BenchmarkStats>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryUsage {
    pub rss_bytes: u64,
}

struct Sample {
    name: String,
    duration: Duration,
    recorded_at: Instant,
}

#[derive(Default)]
struct MonitorState {
    active: HashMap<Uuid, (String, Instant)>,
    samples: VecDeque<Sample>,
}

/// In-process, best-effort operation timing. No cross-process aggregation.
pub struct PerformanceMonitor {
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn start_benchmark(&self, name: &str) -> BenchmarkId {
        let id = Uuid::new_v4();
        self.state()
            .active
            .insert(id, (name.to_string(), Instant::now()));
        BenchmarkId(id)
    }

    /// Records the sample and returns its duration; `None` for an unknown
    /// or already-ended benchmark id.
    pub fn end_benchmark(&self, id: BenchmarkId) -> Option<Duration> {
        let mut state = self.state();

        let Some((name, started)) = state.active.remove(&id.0) else {
            warn!("end_benchmark called with unknown id {:?}", id.0);
            return None;
        };

        let duration = started.elapsed();
        state.samples.push_back(Sample {
            name,
            duration,
            recorded_at: Instant::now(),
        });
        while state.samples.len() > MAX_SAMPLES {
            state.samples.pop_front();
        }

        Some(duration)
    }

    /// Average/min/max duration over the trailing window, grouped by
    /// benchmark name.
    pub fn performance_report(&self) -> PerformanceReport {
        let state = self.state();
        let cutoff = Instant::now().checked_sub(REPORT_WINDOW);

        let mut grouped: HashMap<String, Vec<Duration>> = HashMap::new();
        for sample in &state.samples {
            if cutoff.is_none_or(|cutoff| sample.recorded_at >= cutoff) {
                grouped
                    .entry(sample.name.clone())
                    .or_default()
                    .push(sample.duration);
            }
        }

        let benchmarks = grouped
            .into_iter()
            .map(|(name, durations)| {
                let millis: Vec<f64> = durations
                    .iter()
                    .map(|duration| duration.as_secs_f64() * 1000.0)
                    .collect();
                let sum: f64 = millis.iter().sum();
                let stats = BenchmarkStats {
                    count: millis.len(),
                    avg_ms: sum / millis.len() as f64,
                    min_ms: millis.iter().cloned().fold(f64::INFINITY, f64::min),
                    max_ms: millis.iter().cloned().fold(0.0, f64::max),
                };
                (name, stats)
            })
            .collect();

        PerformanceReport {
            window_secs: REPORT_WINDOW.as_secs(),
            benchmarks,
            generated_at: Utc::now(),
        }
    }

    /// Best-effort process RSS. Linux-only; other platforms report `None`.
    #[cfg(target_os = "linux")]
    pub fn memory_usage(&self) -> Option<MemoryUsage> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        // statm reports pages; 4 KiB pages on every Linux target we ship to.
        Some(MemoryUsage {
            rss_bytes: rss_pages * 4096,
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn memory_usage(&self) -> Option<MemoryUsage> {
        None
    }

    // A poisoned monitor only ever holds timing data; recover rather than
    // propagate a panic into cache callers.
    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_benchmark_records_duration() {
        let monitor = PerformanceMonitor::new();

        let id = monitor.start_benchmark("slack_api_call");
        advance(Duration::from_millis(25)).await;
        let duration = monitor.end_benchmark(id).unwrap();

        assert_eq!(duration, Duration::from_millis(25));

        let report = monitor.performance_report();
        let stats = &report.benchmarks["slack_api_call"];
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg_ms, 25.0);
    }

    #[tokio::test]
    async fn test_unknown_id_returns_none() {
        let monitor = PerformanceMonitor::new();
        let id = monitor.start_benchmark("op");
        assert!(monitor.end_benchmark(id).is_some());
        assert!(monitor.end_benchmark(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_groups_by_name() {
        let monitor = PerformanceMonitor::new();

        for millis in [10u64, 20, 30] {
            let id = monitor.start_benchmark("fetch");
            advance(Duration::from_millis(millis)).await;
            monitor.end_benchmark(id);
        }
        let id = monitor.start_benchmark("store");
        advance(Duration::from_millis(5)).await;
        monitor.end_benchmark(id);

        let report = monitor.performance_report();
        let fetch = &report.benchmarks["fetch"];
        assert_eq!(fetch.count, 3);
        assert_eq!(fetch.avg_ms, 20.0);
        assert_eq!(fetch.min_ms, 10.0);
        assert_eq!(fetch.max_ms, 30.0);
        assert_eq!(report.benchmarks["store"].count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_window_excludes_old_samples() {
        let monitor = PerformanceMonitor::new();

        let id = monitor.start_benchmark("old");
        monitor.end_benchmark(id);

        advance(Duration::from_secs(301)).await;

        let id = monitor.start_benchmark("recent");
        monitor.end_benchmark(id);

        let report = monitor.performance_report();
        assert!(!report.benchmarks.contains_key("old"));
        assert!(report.benchmarks.contains_key("recent"));
    }

    #[tokio::test]
    async fn test_sample_buffer_is_capped() {
        let monitor = PerformanceMonitor::new();

        for i in 0..(MAX_SAMPLES + 50) {
            let id = monitor.start_benchmark(&format!("op{}", i % 4));
            monitor.end_benchmark(id);
        }

        let report = monitor.performance_report();
        let total: usize = report.benchmarks.values().map(|stats| stats.count).sum();
        assert_eq!(total, MAX_SAMPLES);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_memory_usage_reports_rss() {
        let monitor = PerformanceMonitor::new();
        let usage = monitor.memory_usage().unwrap();
        assert!(usage.rss_bytes > 0);
    }
}
