//! Per-engine performance telemetry

use serde::Serialize;
use std::time::Instant;
use utoipa::ToSchema;

/// Smoothing factor for the generation-time moving average.
const EMA_ALPHA: f64 = 0.3;

/// One row of routing telemetry, owned and mutated only by the orchestrator
#[derive(Debug, Clone)]
pub struct PerformanceStats {
    /// Exponential moving average of generation time in seconds; 0 until
    /// the first sample seeds it.
    pub avg_generation_time: f64,
    /// Success percentage mirrored from the engine's own counters.
    pub success_rate: f64,
    pub last_used: Option<Instant>,
    pub total_requests: u64,
}

impl Default for PerformanceStats {
    fn default() -> Self {
        Self {
            avg_generation_time: 0.0,
            success_rate: 100.0,
            last_used: None,
            total_requests: 0,
        }
    }
}

impl PerformanceStats {
    /// Fold one completed top-level call into the row.
    pub fn record(&mut self, elapsed_seconds: f64, success_rate: f64) {
        self.total_requests += 1;
        self.last_used = Some(Instant::now());
        self.success_rate = success_rate;

        if self.total_requests == 1 {
            self.avg_generation_time = elapsed_seconds;
        } else {
            self.avg_generation_time =
                EMA_ALPHA * elapsed_seconds + (1.0 - EMA_ALPHA) * self.avg_generation_time;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            avg_generation_time: self.avg_generation_time,
            success_rate: self.success_rate,
            seconds_since_last_use: self.last_used.map(|t| t.elapsed().as_secs_f64()),
            total_requests: self.total_requests,
        }
    }
}

/// Serializable view of one stats row for status reporting
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsSnapshot {
    pub avg_generation_time: f64,
    pub success_rate: f64,
    pub seconds_since_last_use: Option<f64>,
    pub total_requests: u64,
}
