use std::time::{Duration, Instant};

/// Inbound-activity tracker for one client.
///
/// Heartbeats count as activity, so a healthy-but-quiet connection is never
/// flagged stale as long as the server keepalive keeps arriving.
#[derive(Debug)]
pub struct ConnectionHealth {
    connection_started: Instant,
    last_inbound: Instant,
    stale_threshold: Duration,
    inbound_frames: u64,
    dispatched: u64,
    reconnects: u64,
}

impl ConnectionHealth {
    pub fn new(stale_threshold: Duration) -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_inbound: now,
            stale_threshold,
            inbound_frames: 0,
            dispatched: 0,
            reconnects: 0,
        }
    }

    /// Restart the uptime/staleness clocks for a fresh connection.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_inbound = now;
    }

    pub fn record_inbound(&mut self) {
        self.last_inbound = Instant::now();
        self.inbound_frames = self.inbound_frames.saturating_add(1);
    }

    pub fn record_dispatched(&mut self, callbacks: u64) {
        self.dispatched = self.dispatched.saturating_add(callbacks);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn is_stale(&self) -> bool {
        self.last_inbound.elapsed() > self.stale_threshold
    }

    pub fn uptime(&self) -> Duration {
        self.connection_started.elapsed()
    }

    pub fn last_inbound_age(&self) -> Duration {
        self.last_inbound.elapsed()
    }

    pub fn inbound_frames(&self) -> u64 {
        self.inbound_frames
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_health_is_not_stale() {
        let health = ConnectionHealth::new(Duration::from_secs(1));
        assert!(!health.is_stale());
    }

    #[test]
    fn silence_beyond_the_threshold_is_stale() {
        let mut health = ConnectionHealth::new(Duration::from_secs(1));
        health.last_inbound = health
            .last_inbound
            .checked_sub(Duration::from_secs(10))
            .unwrap();
        assert!(health.is_stale());

        health.record_inbound();
        assert!(!health.is_stale());
    }

    #[test]
    fn counters_accumulate_across_resets() {
        let mut health = ConnectionHealth::new(Duration::from_secs(1));
        health.record_inbound();
        health.record_dispatched(3);
        health.increment_reconnect();
        health.reset();

        assert_eq!(health.inbound_frames(), 1);
        assert_eq!(health.dispatched(), 3);
        assert_eq!(health.reconnects(), 1);
    }
}
