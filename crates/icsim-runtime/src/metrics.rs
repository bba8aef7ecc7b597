//! Per-device cycle statistics.

#![allow(missing_docs)]

use std::time::Duration as StdDuration;

/// Logic execution time and overrun counters for one device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub last_ms: f64,
    /// Cycle boundaries skipped because a tick overran its period.
    pub skipped_cycles: u64,
    /// Ticks that overran and caused at least one skip.
    pub overruns: u64,
    samples: u64,
}

impl CycleStats {
    pub fn record(&mut self, duration: StdDuration) {
        let ms = duration.as_secs_f64() * 1000.0;
        self.last_ms = ms;
        if self.samples == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
            self.avg_ms = ms;
        } else {
            if ms < self.min_ms {
                self.min_ms = ms;
            }
            if ms > self.max_ms {
                self.max_ms = ms;
            }
            #[allow(clippy::cast_precision_loss)]
            let total = self.avg_ms * self.samples as f64 + ms;
            #[allow(clippy::cast_precision_loss)]
            let avg = total / (self.samples as f64 + 1.0);
            self.avg_ms = avg;
        }
        self.samples = self.samples.saturating_add(1);
    }

    pub fn record_overrun(&mut self, skipped: u64) {
        if skipped == 0 {
            return;
        }
        self.overruns = self.overruns.saturating_add(1);
        self.skipped_cycles = self.skipped_cycles.saturating_add(skipped);
    }

    /// Number of ticks recorded.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.samples
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self {
            min_ms: 0.0,
            max_ms: 0.0,
            avg_ms: 0.0,
            last_ms: 0.0,
            skipped_cycles: 0,
            overruns: 0,
            samples: 0,
        }
    }
}
