// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Rolling per-worker processing counters with periodic logging.

use std::time::{Duration, Instant};

use tracing::info;

pub struct WorkerStats {
    frames_processed: u64,
    frames_failed: u64,
    total_latency: Duration,
    started: Instant,
    log_interval: u64,
}

impl WorkerStats {
    pub fn new(log_interval: u64) -> Self {
        WorkerStats {
            frames_processed: 0,
            frames_failed: 0,
            total_latency: Duration::ZERO,
            started: Instant::now(),
            log_interval: log_interval.max(1),
        }
    }

    /// Count one processed frame; logs every `log_interval` frames.
    pub fn record_processed(&mut self, latency: Duration) {
        self.frames_processed += 1;
        self.total_latency += latency;
        if self.frames_processed % self.log_interval == 0 {
            self.log();
        }
    }

    pub fn record_failed(&mut self) {
        self.frames_failed += 1;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }

    /// Mean end-to-end processing latency.
    pub fn average_latency(&self) -> Duration {
        if self.frames_processed == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.frames_processed as u32
        }
    }

    pub fn log(&self) {
        let runtime = self.started.elapsed().as_secs_f64();
        let fps = if runtime > 0.0 { self.frames_processed as f64 / runtime } else { 0.0 };
        info!(
            frames_processed = self.frames_processed,
            frames_failed = self.frames_failed,
            fps = format!("{fps:.2}"),
            avg_latency_ms = self.average_latency().as_millis() as u64,
            runtime_secs = format!("{runtime:.1}"),
            "Performance stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_average_latency() {
        let mut stats = WorkerStats::new(100);
        stats.record_processed(Duration::from_millis(10));
        stats.record_processed(Duration::from_millis(30));
        stats.record_failed();

        assert_eq!(stats.frames_processed(), 2);
        assert_eq!(stats.frames_failed(), 1);
        assert_eq!(stats.average_latency(), Duration::from_millis(20));
    }
}
