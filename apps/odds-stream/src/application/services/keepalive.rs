//! Keepalive Tracker
//!
//! Decides when a quiet subscription should send a ping. The tracker is
//! edge-triggered: one breach of the keepalive interval produces exactly one
//! ping, and no further pings fire until an inbound frame resets the clock.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    /// Quiet period after which a ping is sent.
    pub interval: Duration,
    /// How often the subscription checks the tracker.
    pub check_every: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6),
            check_every: Duration::from_secs(1),
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(interval: Duration, check_every: Duration) -> Self {
        Self {
            interval,
            check_every,
        }
    }
}

/// What the subscription should do on a keepalive check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveDecision {
    /// Traffic is recent enough.
    Idle,
    /// Interval breached; send one ping.
    SendPing,
    /// A ping for the current breach was already sent.
    AwaitingInbound,
}

/// Per-subscription keepalive state.
#[derive(Debug, Clone)]
pub struct KeepaliveTracker {
    interval: Duration,
    last_received_at: Instant,
    ping_pending: bool,
}

impl KeepaliveTracker {
    /// Start tracking from `now`.
    #[must_use]
    pub const fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_received_at: now,
            ping_pending: false,
        }
    }

    /// Record an inbound frame.
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_received_at = now;
        self.ping_pending = false;
    }

    /// Check the tracker at `now`.
    ///
    /// Returns [`KeepaliveDecision::SendPing`] at most once per breach.
    pub fn poll(&mut self, now: Instant) -> KeepaliveDecision {
        if now.saturating_duration_since(self.last_received_at) < self.interval {
            return KeepaliveDecision::Idle;
        }
        if self.ping_pending {
            return KeepaliveDecision::AwaitingInbound;
        }
        self.ping_pending = true;
        KeepaliveDecision::SendPing
    }

    /// Re-arm after a ping could not be sent, so the next check retries.
    pub const fn ping_failed(&mut self) {
        self.ping_pending = false;
    }

    /// Time of the last inbound frame.
    #[must_use]
    pub const fn last_received_at(&self) -> Instant {
        self.last_received_at
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(6);

    #[test]
    fn default_config_values() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(6));
        assert_eq!(config.check_every, Duration::from_secs(1));
    }

    #[test]
    fn idle_before_interval() {
        let start = Instant::now();
        let mut tracker = KeepaliveTracker::new(INTERVAL, start);
        assert_eq!(tracker.poll(start + Duration::from_secs(5)), KeepaliveDecision::Idle);
    }

    #[test]
    fn failed_ping_is_retried_on_next_check() {
        let start = Instant::now();
        let mut tracker = KeepaliveTracker::new(INTERVAL, start);

        assert_eq!(tracker.poll(start + INTERVAL), KeepaliveDecision::SendPing);
        tracker.ping_failed();
        assert_eq!(
            tracker.poll(start + Duration::from_secs(7)),
            KeepaliveDecision::SendPing
        );
        assert_eq!(
            tracker.poll(start + Duration::from_secs(8)),
            KeepaliveDecision::AwaitingInbound
        );
    }

    #[test]
    fn one_ping_per_breach() {
        let start = Instant::now();
        let mut tracker = KeepaliveTracker::new(INTERVAL, start);

        let decisions: Vec<_> = (6..12)
            .map(|s| tracker.poll(start + Duration::from_secs(s)))
            .collect();

        assert_eq!(decisions[0], KeepaliveDecision::SendPing);
        assert!(
            decisions[1..]
                .iter()
                .all(|d| *d == KeepaliveDecision::AwaitingInbound)
        );
    }

    #[test]
    fn inbound_frame_rearms_the_tracker() {
        let start = Instant::now();
        let mut tracker = KeepaliveTracker::new(INTERVAL, start);
        assert_eq!(tracker.poll(start + INTERVAL), KeepaliveDecision::SendPing);

        let ack = start + Duration::from_secs(7);
        tracker.record_inbound(ack);
        assert_eq!(tracker.last_received_at(), ack);
        assert_eq!(tracker.poll(ack + Duration::from_secs(1)), KeepaliveDecision::Idle);
        assert_eq!(tracker.poll(ack + INTERVAL), KeepaliveDecision::SendPing);
    }

    #[test]
    fn quiet_for_saturates() {
        let start = Instant::now();
        let tracker = KeepaliveTracker::new(INTERVAL, start + Duration::from_secs(1));
        assert_eq!(tracker.quiet_for(start), Duration::ZERO);
    }
}
