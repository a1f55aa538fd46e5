// src/harvest/telemetry.rs
//! Process-wide scrape telemetry: totals plus a short window of slow steps.
//! Reset on restart; not part of any data contract.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Steps slower than this enter the expensive window.
pub const EXPENSIVE_THRESHOLD: Duration = Duration::from_secs(2);
pub const EXPENSIVE_CAP: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensiveTask {
    pub source: String,
    pub duration_ms: u64,
    pub at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySummary {
    pub total_scrapes: u64,
    pub avg_duration_sec: f64,
    pub expensive_tasks: Vec<ExpensiveTask>,
}

#[derive(Default)]
struct Window {
    total_scrapes: u64,
    total_duration: Duration,
    expensive: VecDeque<ExpensiveTask>,
}

#[derive(Default)]
pub struct HarvestTelemetry {
    inner: Mutex<Window>,
}

impl HarvestTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one harvest step, successful or not.
    pub fn record(&self, source: &str, elapsed: Duration) {
        let mut w = self.inner.lock();
        w.total_scrapes += 1;
        w.total_duration += elapsed;
        if elapsed > EXPENSIVE_THRESHOLD {
            if w.expensive.len() >= EXPENSIVE_CAP {
                w.expensive.pop_front();
            }
            w.expensive.push_back(ExpensiveTask {
                source: source.to_string(),
                duration_ms: elapsed.as_millis() as u64,
                at: chrono::Utc::now().timestamp(),
            });
        }
    }

    pub fn summary(&self) -> TelemetrySummary {
        let w = self.inner.lock();
        let avg = if w.total_scrapes == 0 {
            0.0
        } else {
            w.total_duration.as_secs_f64() / w.total_scrapes as f64
        };
        TelemetrySummary {
            total_scrapes: w.total_scrapes,
            avg_duration_sec: avg,
            expensive_tasks: w.expensive.iter().cloned().collect(),
        }
    }
}
