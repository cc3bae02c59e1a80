use std::time::{Duration, Instant};

/// Minimum spacing between outbound broadcasts.
#[derive(Debug, Clone)]
pub struct SyncThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl SyncThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// True when `force` is set or `min_interval` has elapsed since the last
    /// recorded broadcast.
    pub fn should_sync(&self, force: bool) -> bool {
        if force {
            return true;
        }
        match self.last {
            Some(last) => last.elapsed() >= self.min_interval,
            None => true,
        }
    }

    pub fn record(&mut self) {
        self.last = Some(Instant::now());
    }

    pub fn since_last(&self) -> Option<Duration> {
        self.last.map(|last| last.elapsed())
    }
}
