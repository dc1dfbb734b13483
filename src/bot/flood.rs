use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Rate threshold: `count` messages within `window_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodPolicy {
    pub count: u32,
    pub window_seconds: u32,
}

impl Default for FloodPolicy {
    fn default() -> Self {
        Self {
            count: 6,
            window_seconds: 5,
        }
    }
}

/// Sliding-window message counter per (channel, user)
#[derive(Debug, Default)]
pub struct FloodDetector {
    policy: FloodPolicy,
    windows: HashMap<(String, String), VecDeque<DateTime<Utc>>>,
}

impl FloodDetector {
    pub fn new(policy: FloodPolicy) -> Self {
        Self {
            policy,
            windows: HashMap::new(),
        }
    }

    pub fn policy(&self) -> FloodPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FloodPolicy) {
        self.policy = policy;
    }

    fn key(channel: &str, user: &str) -> (String, String) {
        (channel.to_lowercase(), user.to_lowercase())
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.policy.window_seconds))
    }

    /// Record a message at `now` and report whether the user reached the
    /// threshold within `[now - window, now]`. The caller clears the window
    /// after acting on a trigger.
    pub fn observe(&mut self, channel: &str, user: &str, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.window();
        let threshold = self.policy.count as usize;

        let timestamps = self.windows.entry(Self::key(channel, user)).or_default();
        while timestamps.front().is_some_and(|t| *t < cutoff) {
            timestamps.pop_front();
        }
        timestamps.push_back(now);

        let triggered = timestamps.len() >= threshold;
        if triggered {
            debug!(
                "Flood threshold reached by {} in {}: {} messages in {}s",
                user, channel, timestamps.len(), self.policy.window_seconds
            );
        }
        triggered
    }

    pub fn clear(&mut self, channel: &str, user: &str) {
        self.windows.remove(&Self::key(channel, user));
    }

    /// Drop windows whose newest entry has aged out. Returns how many were dropped.
    pub fn prune_idle(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window();
        let before = self.windows.len();
        self.windows
            .retain(|_, timestamps| timestamps.back().is_some_and(|t| *t >= cutoff));
        before - self.windows.len()
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn detector() -> FloodDetector {
        FloodDetector::new(FloodPolicy {
            count: 6,
            window_seconds: 5,
        })
    }

    #[test]
    fn test_sixth_message_in_window_triggers() {
        let mut flood = detector();
        for i in 0..5 {
            assert!(!flood.observe("#chan", "spammer", at(i)));
        }
        assert!(flood.observe("#chan", "spammer", at(5)));
    }

    #[test]
    fn test_aged_out_message_does_not_count() {
        let mut flood = detector();
        for i in 0..5 {
            assert!(!flood.observe("#chan", "user", at(i)));
        }
        // first message at t=0 is outside [1, 6]
        assert!(!flood.observe("#chan", "user", at(6)));
    }

    #[test]
    fn test_window_boundary_is_closed() {
        let mut flood = detector();
        assert!(!flood.observe("#chan", "user", at(0)));
        for _ in 0..4 {
            assert!(!flood.observe("#chan", "user", at(3)));
        }
        // t=0 is exactly now - 5s and still counts
        assert!(flood.observe("#chan", "user", at(5)));
    }

    #[test]
    fn test_windows_are_per_channel_and_user() {
        let mut flood = detector();
        for i in 0..5 {
            flood.observe("#a", "user", at(i));
            flood.observe("#b", "user", at(i));
            flood.observe("#a", "other", at(i));
        }
        assert_eq!(flood.tracked_users(), 3);
        assert!(flood.observe("#A", "USER", at(5)));
    }

    #[test]
    fn test_clear_resets_window() {
        let mut flood = detector();
        for i in 0..6 {
            flood.observe("#chan", "user", at(i));
        }
        flood.clear("#chan", "user");
        assert!(!flood.observe("#chan", "user", at(6)));
    }

    #[test]
    fn test_prune_idle_drops_quiet_users() {
        let mut flood = detector();
        flood.observe("#chan", "quiet", at(0));
        flood.observe("#chan", "active", at(8));
        assert_eq!(flood.prune_idle(at(10)), 1);
        assert_eq!(flood.tracked_users(), 1);
    }
}
