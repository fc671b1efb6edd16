//! Phase timing for freezing and building.

use std::time::{Duration, Instant};

/// Measures one phase (freeze, build) and logs how long it took.
pub struct Timer {
    phase: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(phase: &'static str) -> Self {
        tracing::debug!(phase, "started");
        Self {
            phase,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log the elapsed time and return it.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::info!(phase = self.phase, "done in {}", format_duration(elapsed));
        elapsed
    }
}

/// `850ms`, `12.3s` or `2.5m`.
fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else if secs >= 1.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}
