//! Per-client request rate limiting.
//!
//! Each client owns two sets of counters keyed by bucket number: one bucket
//! per wall-clock minute and one per wall-clock hour. A request is denied
//! when the current minute or hour bucket is already at its threshold.
//! Stale buckets are purged whenever the client is touched, and idle
//! clients are dropped by [`RateLimiter::prune_idle`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::config::RateLimitConfig;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;

/// Minute buckets older than this many minutes are dropped.
const MINUTE_BUCKET_RETENTION: u64 = 60;

/// Hour buckets older than this many hours are dropped.
const HOUR_BUCKET_RETENTION: u64 = 24;

// ============================================================================
// Decision
// ============================================================================

/// The window whose threshold caused a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Minute,
    Hour,
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitWindow::Minute => write!(f, "minute"),
            LimitWindow::Hour => write!(f, "hour"),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the offending window rolls over. Set only on denial.
    pub retry_after_seconds: Option<u64>,
    /// Human-readable denial reason. Set only on denial.
    pub reason: Option<String>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: None,
            reason: None,
        }
    }

    fn deny(window: LimitWindow, limit: u32, retry_after_seconds: u64) -> Self {
        Self {
            allowed: false,
            retry_after_seconds: Some(retry_after_seconds),
            reason: Some(format!(
                "Rate limit of {limit} requests per {window} exceeded"
            )),
        }
    }
}

// ============================================================================
// RateLimiter
// ============================================================================

#[derive(Debug, Default)]
struct ClientWindows {
    minutes: HashMap<u64, u32>,
    hours: HashMap<u64, u32>,
}

impl ClientWindows {
    fn purge(&mut self, minute: u64, hour: u64) {
        self.minutes
            .retain(|bucket, _| bucket + MINUTE_BUCKET_RETENTION > minute);
        self.hours
            .retain(|bucket, _| bucket + HOUR_BUCKET_RETENTION > hour);
    }

    fn is_empty(&self) -> bool {
        self.minutes.is_empty() && self.hours.is_empty()
    }
}

/// Sliding minute/hour request counter, keyed by client identifier.
///
/// Cloning is cheap and clones share state. Checks for one client are
/// atomic; checks for different clients only contend when they hash to the
/// same shard.
#[derive(Clone)]
pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    clients: Arc<DashMap<String, ClientWindows>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
            clients: Arc::new(DashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.per_minute, config.per_hour)
    }

    /// Check and, if allowed, count a request from `client_id`.
    pub fn check(&self, client_id: &str) -> RateLimitDecision {
        self.check_at(client_id, unix_now())
    }

    /// Like [`check`](Self::check) with an explicit clock, in unix seconds.
    pub fn check_at(&self, client_id: &str, now_secs: u64) -> RateLimitDecision {
        let minute = now_secs / SECS_PER_MINUTE;
        let hour = now_secs / SECS_PER_HOUR;

        let mut entry = self.clients.entry(client_id.to_string()).or_default();
        let windows = entry.value_mut();
        windows.purge(minute, hour);

        let minute_count = windows.minutes.get(&minute).copied().unwrap_or(0);
        if minute_count >= self.per_minute {
            return RateLimitDecision::deny(
                LimitWindow::Minute,
                self.per_minute,
                SECS_PER_MINUTE - now_secs % SECS_PER_MINUTE,
            );
        }

        let hour_count = windows.hours.get(&hour).copied().unwrap_or(0);
        if hour_count >= self.per_hour {
            return RateLimitDecision::deny(
                LimitWindow::Hour,
                self.per_hour,
                SECS_PER_HOUR - now_secs % SECS_PER_HOUR,
            );
        }

        *windows.minutes.entry(minute).or_insert(0) += 1;
        *windows.hours.entry(hour).or_insert(0) += 1;
        RateLimitDecision::allow()
    }

    /// Purge stale buckets for every client and drop clients left with none.
    /// Returns the number of clients dropped.
    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(unix_now())
    }

    pub fn prune_idle_at(&self, now_secs: u64) -> usize {
        let minute = now_secs / SECS_PER_MINUTE;
        let hour = now_secs / SECS_PER_HOUR;
        let before = self.clients.len();
        self.clients.retain(|_, windows| {
            windows.purge(minute, hour);
            !windows.is_empty()
        });
        before.saturating_sub(self.clients.len())
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z, aligned to both a minute and an hour boundary.
    const T0: u64 = 1_704_067_200;

    #[test]
    fn denies_61st_request_in_a_minute() {
        let limiter = RateLimiter::new(60, 1000);
        for i in 0..60 {
            let decision = limiter.check_at("10.0.0.1", T0 + 5);
            assert!(decision.allowed, "request {} should pass", i + 1);
        }

        let decision = limiter.check_at("10.0.0.1", T0 + 5);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, Some(55));
        assert!(decision.reason.unwrap().contains("minute"));
    }

    #[test]
    fn live_clock_denial_has_positive_retry_after() {
        let limiter = RateLimiter::new(60, 1000);
        let decisions: Vec<_> = (0..61).map(|_| limiter.check("client")).collect();
        let last = decisions.last().unwrap();
        // The minute may roll over mid-loop; either way nothing past 60 in
        // one bucket is allowed.
        if !last.allowed {
            assert!(last.retry_after_seconds.unwrap() > 0);
        }
    }

    #[test]
    fn minute_window_rolls_over() {
        let limiter = RateLimiter::new(2, 1000);
        assert!(limiter.check_at("c", T0).allowed);
        assert!(limiter.check_at("c", T0 + 1).allowed);
        assert!(!limiter.check_at("c", T0 + 59).allowed);
        assert!(limiter.check_at("c", T0 + 60).allowed);
    }

    #[test]
    fn hour_limit_applies_across_minutes() {
        let limiter = RateLimiter::new(60, 3);
        assert!(limiter.check_at("c", T0).allowed);
        assert!(limiter.check_at("c", T0 + 60).allowed);
        assert!(limiter.check_at("c", T0 + 120).allowed);

        let decision = limiter.check_at("c", T0 + 180);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_seconds, Some(3600 - 180));
        assert!(decision.reason.unwrap().contains("hour"));

        assert!(limiter.check_at("c", T0 + 3600).allowed);
    }

    #[test]
    fn denied_requests_are_not_counted() {
        let limiter = RateLimiter::new(1, 2);
        assert!(limiter.check_at("c", T0).allowed);
        for _ in 0..10 {
            assert!(!limiter.check_at("c", T0 + 1).allowed);
        }
        // Hour bucket only holds the one allowed request.
        assert!(limiter.check_at("c", T0 + 60).allowed);
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, 1000);
        assert!(limiter.check_at("a", T0).allowed);
        assert!(!limiter.check_at("a", T0).allowed);
        assert!(limiter.check_at("b", T0).allowed);
    }

    #[test]
    fn stale_buckets_are_purged_on_access() {
        let limiter = RateLimiter::new(60, 1000);
        for m in 0..5 {
            limiter.check_at("c", T0 + m * 60);
        }
        assert_eq!(limiter.clients.get("c").unwrap().minutes.len(), 5);

        // Two hours later every minute bucket is older than the retention.
        limiter.check_at("c", T0 + 2 * 3600);
        let windows = limiter.clients.get("c").unwrap();
        assert_eq!(windows.minutes.len(), 1);
        assert_eq!(windows.hours.len(), 2);
    }

    #[test]
    fn prune_idle_drops_quiet_clients() {
        let limiter = RateLimiter::new(60, 1000);
        limiter.check_at("old", T0);
        limiter.check_at("recent", T0 + 24 * 3600);

        let dropped = limiter.prune_idle_at(T0 + 25 * 3600);
        assert_eq!(dropped, 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.clients.contains_key("recent"));
    }
}
