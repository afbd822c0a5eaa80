//! Ping flood detection.
//!
//! A ping is cheap to send, legal for the whole authenticated lifetime of a
//! connection and answered by the server every time, which makes it an easy
//! amplification vector. The guard counts consecutive pings that arrive sooner
//! than the configured interval and rejects the first one past the limit.

use std::time::{Duration, Instant};

use crate::config::FloodConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingVerdict {
    Allow,
    Reject,
}

#[derive(Debug, Clone)]
pub struct FloodGuard {
    min_interval: Duration,
    max_overspeed: u32,
    last_ping: Option<Instant>,
    overspeed: u32,
}

impl FloodGuard {
    pub fn new(config: &FloodConfig) -> Self {
        Self::with_limits(config.min_ping_interval, config.max_overspeed_pings)
    }

    /// `max_overspeed == 0` disables rejection; pings are still tracked.
    pub fn with_limits(min_interval: Duration, max_overspeed: u32) -> Self {
        Self {
            min_interval,
            max_overspeed,
            last_ping: None,
            overspeed: 0,
        }
    }

    /// Record a ping received at `now`.
    pub fn record_ping(&mut self, now: Instant) -> PingVerdict {
        let Some(last) = self.last_ping.replace(now) else {
            return PingVerdict::Allow;
        };

        if now.saturating_duration_since(last) < self.min_interval {
            self.overspeed = self.overspeed.saturating_add(1);
            if self.max_overspeed > 0 && self.overspeed > self.max_overspeed {
                return PingVerdict::Reject;
            }
        } else {
            self.overspeed = 0;
        }

        PingVerdict::Allow
    }

    /// Consecutive over-speed pings seen so far.
    pub fn overspeed_pings(&self) -> u32 {
        self.overspeed
    }
}
