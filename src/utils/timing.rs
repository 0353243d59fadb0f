//! Timing utilities
//!
//! Measures named operations with optional checkpoints. Results go to the
//! `debug` log so hot paths stay quiet at the default level.

use log::{debug, warn};
use std::time::{Duration, Instant};

/// A timer for one named operation
#[derive(Debug)]
pub struct Timer {
    start_time: Instant,
    operation_name: String,
    checkpoints: Vec<(String, Instant)>,
}

impl Timer {
    pub fn start(operation_name: &str) -> Self {
        Self {
            start_time: Instant::now(),
            operation_name: operation_name.to_string(),
            checkpoints: Vec::new(),
        }
    }

    /// Records an intermediate point; `finish` reports the segment lengths.
    pub fn checkpoint(&mut self, checkpoint_name: &str) {
        self.checkpoints.push((checkpoint_name.to_string(), Instant::now()));
    }

    /// Segment durations between consecutive checkpoints, in order.
    pub fn segments(&self) -> Vec<(&str, Duration)> {
        let mut last = self.start_time;
        self.checkpoints
            .iter()
            .map(|(name, at)| {
                let segment = at.duration_since(last);
                last = *at;
                (name.as_str(), segment)
            })
            .collect()
    }

    pub fn finish(self) -> Duration {
        let total = self.start_time.elapsed();
        if self.checkpoints.is_empty() {
            debug!("🕐 {} completed in {:.2}ms", self.operation_name, millis(total));
        } else {
            let segments = self
                .segments()
                .into_iter()
                .map(|(name, d)| format!("{} {:.2}ms", name, millis(d)))
                .collect::<Vec<_>>()
                .join(", ");
            debug!(
                "🕐 {} completed in {:.2}ms ({})",
                self.operation_name,
                millis(total),
                segments
            );
        }
        total
    }

    /// Like `finish`, with a warning when the operation took longer than
    /// `threshold`.
    pub fn finish_with_threshold(self, threshold: Duration) -> Duration {
        let name = self.operation_name.clone();
        let total = self.finish();
        if total > threshold {
            warn!(
                "⚠️ {} took {:.2}ms (threshold {}ms)",
                name,
                millis(total),
                threshold.as_millis()
            );
        }
        total
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_partition_elapsed_time() {
        let mut timer = Timer::start("op");
        std::thread::sleep(Duration::from_millis(2));
        timer.checkpoint("first");
        std::thread::sleep(Duration::from_millis(2));
        timer.checkpoint("second");

        let segments = timer.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].0, "first");
        assert!(segments[0].1 >= Duration::from_millis(2));
        let summed: Duration = segments.iter().map(|(_, d)| *d).sum();
        let total = timer.finish();
        assert!(total >= summed);
    }
}
