use std::time::{Duration, Instant};

/// Wall-clock stopwatch used to stamp response latency and overall deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    start: Instant,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before `budget` is spent, zero once it has passed.
    pub fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
