//! Tuple-count progress reporting for long loads

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

/// Counts processed tuples and logs every `tick` of them.
///
/// Shared by reference between index-build workers, so counting is atomic.
#[derive(Debug)]
pub struct ProgressMonitor {
    label: String,
    tick: u64,
    super_tick: u64,
    count: AtomicU64,
    start: Instant,
}

impl ProgressMonitor {
    /// `tick` = 0 disables the per-tick line; `super_tick` counts ticks.
    pub fn new(label: impl Into<String>, tick: u64, super_tick: u64) -> Self {
        Self {
            label: label.into(),
            tick,
            super_tick,
            count: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn tick(&self) {
        self.tick_n(1);
    }

    pub fn tick_n(&self, n: u64) {
        let before = self.count.fetch_add(n, Ordering::Relaxed);
        if self.tick == 0 {
            return;
        }
        let after = before + n;
        if before / self.tick == after / self.tick {
            return;
        }

        let elapsed = self.elapsed();
        info!(
            "{}: {} ({:.0} per second)",
            self.label,
            after,
            rate(after, elapsed)
        );

        let every = self.tick.saturating_mul(self.super_tick);
        if every > 0 && before / every != after / every {
            info!("{}: elapsed {:.2}s", self.label, elapsed.as_secs_f64());
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the final count and rate; returns the elapsed time.
    pub fn finish(&self) -> Duration {
        let elapsed = self.elapsed();
        let count = self.count();
        info!(
            "{}: finished {} in {:.2}s ({:.0} per second)",
            self.label,
            count,
            elapsed.as_secs_f64(),
            rate(count, elapsed)
        );
        elapsed
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_across_threads() {
        let monitor = ProgressMonitor::new("test", 10, 5);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        monitor.tick();
                    }
                });
            }
        });
        monitor.tick_n(3);
        assert_eq!(monitor.count(), 1003);
    }

    #[test]
    fn test_zero_tick_is_silent() {
        let monitor = ProgressMonitor::new("quiet", 0, 0);
        monitor.tick_n(1_000_000);
        assert_eq!(monitor.count(), 1_000_000);
    }
}
