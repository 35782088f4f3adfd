//! Progress tracking for a pass.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::warn;

/// Tracks processed records against a pre-counted total.
///
/// The total is counted before the first page is read, so rows added to the
/// source during the pass could push the processed count past it. The
/// reported count is clamped.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    processed: u64,
    overflow_reported: bool,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            overflow_reported: false,
            start_time: Instant::now(),
        }
    }

    /// Count `n` more processed records.
    pub fn advance(&mut self, n: u64) {
        self.processed += n;
        if self.processed > self.total && !self.overflow_reported {
            warn!(
                "Processed {} records but only {} were counted up front; \
                 the source changed during the pass",
                self.processed, self.total
            );
            self.overflow_reported = true;
        }
    }

    /// Processed count, never above the total.
    pub fn processed(&self) -> u64 {
        self.processed.min(self.total)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed() as f64 * 100.0 / self.total as f64
    }

    /// Records per second since the tracker was created.
    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.processed as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// A progress line, printed as JSON to stderr when progress output is on.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate<'a> {
    pub pass: &'a str,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub created: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ProgressUpdate<'_> {
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => warn!("Failed to serialize progress update: {}", e),
        }
    }
}
