//! Rolling statistics for the pipeline controller.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Smoothing factor for the processing-time moving average.
const EMA_ALPHA: f64 = 0.2;

/// Counters and timing aggregates maintained by the controller.
///
/// Processing time is tracked as an exponential moving average so the
/// figure reflects recent behavior without storing per-job samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    /// Jobs that reached a terminal state.
    pub total_processed: u64,
    /// Jobs that completed with an approved draft.
    pub success_count: u64,
    /// Jobs that exhausted their attempts.
    pub failure_count: u64,
    /// Smoothed per-job processing time in milliseconds.
    pub average_processing_ms: f64,
    /// When the most recent terminal outcome was recorded.
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl PipelineMetrics {
    pub fn record_success(&mut self, duration_ms: u64) {
        self.success_count += 1;
        self.record_terminal(duration_ms);
    }

    pub fn record_failure(&mut self, duration_ms: u64) {
        self.failure_count += 1;
        self.record_terminal(duration_ms);
    }

    fn record_terminal(&mut self, duration_ms: u64) {
        self.total_processed += 1;
        if self.total_processed == 1 {
            self.average_processing_ms = duration_ms as f64;
        } else {
            self.average_processing_ms = EMA_ALPHA * duration_ms as f64
                + (1.0 - EMA_ALPHA) * self.average_processing_ms;
        }
        self.last_processed_at = Some(Utc::now());
    }

    /// Fraction of terminal jobs that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        if self.total_processed == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_processed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let mut metrics = PipelineMetrics::default();
        metrics.record_success(1000);
        assert_eq!(metrics.average_processing_ms, 1000.0);
        assert_eq!(metrics.total_processed, 1);
        assert!(metrics.last_processed_at.is_some());
    }

    #[test]
    fn test_average_tracks_recent_samples() {
        let mut metrics = PipelineMetrics::default();
        metrics.record_success(1000);
        metrics.record_success(2000);
        // 0.2 * 2000 + 0.8 * 1000
        assert_eq!(metrics.average_processing_ms, 1200.0);
    }

    #[test]
    fn test_success_rate() {
        let mut metrics = PipelineMetrics::default();
        assert_eq!(metrics.success_rate(), 0.0);
        metrics.record_success(100);
        metrics.record_success(100);
        metrics.record_failure(100);
        assert!((metrics.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
