use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const STEP: Duration = Duration::from_secs(60);
const CEILING: Duration = Duration::from_secs(300);

/// Bounded retry for periodic REST sources.
///
/// Each failure waits one more minute than the last, capped at five. After
/// five failed attempts the source gives up until the next scheduled refresh
/// or a success resets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    failures: u32,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure. `None` means stop retrying.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures < MAX_ATTEMPTS {
            Some((STEP * self.failures).min(CEILING))
        } else {
            None
        }
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
