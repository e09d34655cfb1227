//! Slow-operation and oversize-event monitoring
//!
//! Two thresholds, a handful of monotonic counters, and a teardown report.
//! The monitor observes; it never changes pipeline behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::event::RowChange;

/// Process-wide monitor, passed by reference to keep things testable.
#[derive(Debug)]
pub struct Monitor {
    slow_threshold: Duration,
    /// Oversize threshold in bytes; zero or negative disables the check.
    oversize_threshold: i64,

    slow_count: AtomicU64,
    oversize_count: AtomicU64,
    max_event_size: AtomicU64,
    decode_failures: AtomicU64,
    handler_errors: AtomicU64,
}

/// Counter snapshot, reported at teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorStats {
    pub slow_count: u64,
    pub oversize_count: u64,
    pub max_event_size: u64,
    pub decode_failures: u64,
    pub handler_errors: u64,
}

impl Monitor {
    pub fn new(slow_threshold: Duration, oversize_threshold: i64) -> Self {
        Self {
            slow_threshold,
            oversize_threshold,
            slow_count: AtomicU64::new(0),
            oversize_count: AtomicU64::new(0),
            max_event_size: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }

    /// Warn when an operation that started at `start` exceeded the slow
    /// threshold.
    pub fn record_slow(&self, name: &str, start: Instant, args: &str) {
        let elapsed = start.elapsed();
        if elapsed > self.slow_threshold {
            self.slow_count.fetch_add(1, Ordering::Relaxed);
            warn!(operation = name, ?elapsed, args, "slow operation");
        }
    }

    /// Warn when an event's raw payload exceeds the oversize threshold.
    /// The event is still dispatched.
    pub fn record_size(&self, event: &RowChange) {
        if self.oversize_threshold <= 0 {
            return;
        }

        let size = event.raw_len() as i64;
        if size > self.oversize_threshold {
            self.oversize_count.fetch_add(1, Ordering::Relaxed);
            self.max_event_size.fetch_max(size as u64, Ordering::Relaxed);
            warn!(
                log_pos = event.log_pos,
                event_type = %event.event_type,
                size,
                "oversize event"
            );
        }
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            slow_count: self.slow_count.load(Ordering::Relaxed),
            oversize_count: self.oversize_count.load(Ordering::Relaxed),
            max_event_size: self.max_event_size.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }

    /// Emit the final counter summary.
    pub fn report(&self) {
        let stats = self.stats();
        if stats.slow_count > 0 {
            info!(
                count = stats.slow_count,
                threshold = ?self.slow_threshold,
                "slow operations detected"
            );
        }
        if stats.oversize_count > 0 {
            info!(
                count = stats.oversize_count,
                max_size = stats.max_event_size,
                threshold = self.oversize_threshold,
                "oversize events detected"
            );
        }
        if stats.decode_failures > 0 {
            info!(count = stats.decode_failures, "events dropped on decode failure");
        }
        if stats.handler_errors > 0 {
            info!(count = stats.handler_errors, "handler errors (non-fatal)");
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 1024)
    }
}
