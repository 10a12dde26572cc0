//! Metrics collector (§4.4 "Metrics collector").
//!
//! A rolling per-tool window of execution records. `record` appends and
//! evicts anything outside the window (by age or by count, whichever is
//! smaller); `snapshot` aggregates the surviving records.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_RECORDS: usize = 1000;

struct Record {
    at: Instant,
    success: bool,
    execution_time_ms: u64,
}

struct ToolWindow {
    records: VecDeque<Record>,
}

impl ToolWindow {
    fn new() -> Self {
        Self { records: VecDeque::new() }
    }
}

/// Aggregated stats over the records currently inside the window.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolMetrics {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub recent_failures_60s: u64,
    pub last_called_at_ms_ago: Option<u64>,
}

pub struct MetricsCollector {
    window: Duration,
    max_records: usize,
    tools: RwLock<HashMap<String, ToolWindow>>,
}

impl MetricsCollector {
    pub fn new(window: Duration, max_records: usize) -> Self {
        Self { window, max_records, tools: RwLock::new(HashMap::new()) }
    }

    /// Append a completed invocation's outcome, evicting anything now
    /// outside the rolling window (by age or by count).
    pub fn record(&self, tool_name: &str, success: bool, execution_time_ms: u64) {
        let now = Instant::now();
        let mut tools = self.tools.write();
        let entry = tools.entry(tool_name.to_string()).or_insert_with(ToolWindow::new);
        entry.records.push_back(Record { at: now, success, execution_time_ms });
        self.evict(entry, now);
    }

    fn evict(&self, window: &mut ToolWindow, now: Instant) {
        while window.records.len() > self.max_records {
            window.records.pop_front();
        }
        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        while window.records.front().map(|r| r.at < cutoff).unwrap_or(false) {
            window.records.pop_front();
        }
    }

    /// Aggregate the current window for `tool_name`, or `None` if nothing
    /// has been recorded.
    pub fn snapshot(&self, tool_name: &str) -> Option<ToolMetrics> {
        let now = Instant::now();
        let tools = self.tools.read();
        let window = tools.get(tool_name)?;
        if window.records.is_empty() {
            return None;
        }

        let total = window.records.len() as u64;
        let success = window.records.iter().filter(|r| r.success).count() as u64;
        let failure = total - success;

        let mut durations: Vec<u64> = window.records.iter().map(|r| r.execution_time_ms).collect();
        durations.sort_unstable();

        let min = *durations.first().unwrap();
        let max = *durations.last().unwrap();
        let avg = durations.iter().sum::<u64>() as f64 / total as f64;

        let recent_cutoff = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);
        let recent_failures_60s =
            window.records.iter().filter(|r| !r.success && r.at >= recent_cutoff).count() as u64;

        let last_called_at_ms_ago =
            window.records.back().map(|r| now.saturating_duration_since(r.at).as_millis() as u64);

        Some(ToolMetrics {
            total,
            success,
            failure,
            success_rate: success as f64 / total as f64,
            min,
            max,
            avg,
            p50: percentile(&durations, 50),
            p95: percentile(&durations, 95),
            p99: percentile(&durations, 99),
            recent_failures_60s,
            last_called_at_ms_ago,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_RECORDS)
    }
}

/// `sorted[ceil(p/100 * n) - 1]` per §4.4's exact formula. `sorted` must
/// already be sorted ascending and non-empty.
fn percentile(sorted: &[u64], p: u64) -> u64 {
    let n = sorted.len() as u64;
    let rank = (p * n).div_ceil(100).max(1);
    sorted[(rank - 1) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_spec_formula() {
        // sorted[ceil(p/100 * n) - 1]
        let sorted = vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        assert_eq!(percentile(&sorted, 50), 50);
        assert_eq!(percentile(&sorted, 95), 100);
        assert_eq!(percentile(&sorted, 99), 100);
    }

    #[test]
    fn snapshot_is_none_for_unseen_tool() {
        let mc = MetricsCollector::default();
        assert!(mc.snapshot("ghost").is_none());
    }

    #[test]
    fn snapshot_aggregates_basic_stats() {
        let mc = MetricsCollector::default();
        mc.record("bash", true, 100);
        mc.record("bash", true, 200);
        mc.record("bash", false, 300);

        let stats = mc.snapshot("bash").unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.min, 100);
        assert_eq!(stats.max, 300);
        assert!((stats.avg - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.recent_failures_60s, 1);
        assert_eq!(stats.last_called_at_ms_ago, Some(0));
    }

    #[test]
    fn record_evicts_beyond_max_records() {
        let mc = MetricsCollector::new(DEFAULT_WINDOW, 2);
        mc.record("t", true, 1);
        mc.record("t", true, 2);
        mc.record("t", true, 3);

        let stats = mc.snapshot("t").unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.min, 2);
        assert_eq!(stats.max, 3);
    }

    #[test]
    fn record_evicts_entries_outside_age_window() {
        let mc = MetricsCollector::new(Duration::from_millis(10), 1000);
        mc.record("t", true, 1);
        std::thread::sleep(Duration::from_millis(30));
        mc.record("t", true, 2);

        let stats = mc.snapshot("t").unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.min, 2);
    }
}
