use std::time::Duration;

/// Bounded exponential backoff for reconnect attempts.
///
/// The policy is deterministic (no jitter): attempt `n` is delayed by
/// `min(base * 2^(n-1), max)`, and at most `max_attempts` automatic attempts
/// are made before the controller gives up. The counter resets on a
/// successful connect or an explicit caller-driven `connect()`.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            attempts: 0,
        }
    }

    /// Claim the next attempt and return its delay, or `None` once the
    /// attempt budget is spent. The counter is incremented before the delay
    /// is computed.
    pub fn begin_attempt(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let factor = 1u32.checked_shl(self.attempts - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Spend the remaining budget, suppressing further automatic attempts.
    pub fn exhaust(&mut self) {
        self.attempts = self.max_attempts;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}
