//! RAII timing for save cycles.
//!
//! ```rust,ignore
//! let _timing = TimingGuard::save(path.display().to_string());
//! // adapter save, capture, prune
//! // the duration is logged when `_timing` drops
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cycles slower than this are logged as warnings.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(10);

/// Logs how long an operation took when dropped.
///
/// Fast operations log at debug level; anything over the slow threshold
/// is a warning.
pub struct TimingGuard {
    operation: &'static str,
    subject: String,
    start: Instant,
    slow_after: Duration,
}

impl TimingGuard {
    pub fn new(operation: &'static str, subject: impl Into<String>) -> Self {
        Self {
            operation,
            subject: subject.into(),
            start: Instant::now(),
            slow_after: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Guard for one save-capture-prune cycle of `path`.
    pub fn save(path: impl Into<String>) -> Self {
        Self::new("save", path)
    }

    /// Warn when the operation takes at least `threshold`.
    pub fn slow_after(mut self, threshold: Duration) -> Self {
        self.slow_after = threshold;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed >= self.slow_after
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        if self.is_slow(elapsed) {
            warn!(
                operation = self.operation,
                subject = %self.subject,
                duration_ms,
                "Slow {} took {:.2}s",
                self.operation,
                elapsed.as_secs_f64()
            );
        } else {
            debug!(
                operation = self.operation,
                subject = %self.subject,
                duration_ms,
                "{} finished",
                self.operation
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_measures_elapsed_time() {
        let guard = TimingGuard::save("/docs/a.txt");
        sleep(Duration::from_millis(10));
        assert!(guard.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_slow_threshold() {
        let guard = TimingGuard::new("capture", "/docs/a.txt").slow_after(Duration::from_millis(5));
        assert!(!guard.is_slow(Duration::from_millis(1)));
        assert!(guard.is_slow(Duration::from_millis(5)));

        let default = TimingGuard::save("/docs/a.txt");
        assert!(!default.is_slow(Duration::from_secs(9)));
    }
}
