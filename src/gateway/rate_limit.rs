//! Per-IP sliding-window rate limiting for the REST API.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted; `remaining` more fit in the current window
    Allowed { remaining: u32 },
    /// Over budget; the oldest request leaves the window after `retry_after`
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Sliding-window rate limiter. Per-IP request tracking.
pub struct SlidingWindowRateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, VecDeque<Instant>>> {
        // the map holds plain timestamps, so a poisoned lock is still usable
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a request from `ip` and decide whether to admit it.
    /// A limit of 0 means unlimited.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        if self.limit == 0 {
            return RateDecision::Allowed {
                remaining: u32::MAX,
            };
        }

        let now = Instant::now();
        let mut entries = self.lock();
        let timestamps = entries.entry(ip).or_default();
        expire(timestamps, now, self.window);

        if timestamps.len() >= self.limit as usize {
            let retry_after = timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return RateDecision::Limited { retry_after };
        }

        timestamps.push_back(now);
        RateDecision::Allowed {
            remaining: self.limit - timestamps.len() as u32,
        }
    }

    /// Remove IPs with no active timestamps (call periodically).
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, timestamps| {
            expire(timestamps, now, self.window);
            !timestamps.is_empty()
        });
    }

    /// Number of tracked IPs.
    pub fn entry_count(&self) -> usize {
        self.lock().len()
    }
}

fn expire(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while timestamps
        .front()
        .is_some_and(|&t| now.saturating_duration_since(t) >= window)
    {
        timestamps.pop_front();
    }
}
