//! Fixed-window request rate limiting.
//!
//! Four buckets with independent limits over a shared 15-minute window.
//! Counters live in a lock-free map keyed by (bucket, caller); the periodic
//! sweeper drops windows that have rolled over.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Window length for every bucket.
const WINDOW: Duration = Duration::from_secs(15 * 60);

/// Rate-limit bucket identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateBucket {
    /// Unauthenticated reads, keyed by IP.
    PublicRead,
    /// Authenticated mutations, keyed by user id (IP fallback).
    AuthenticatedAction,
    /// Failed authentication attempts, keyed by IP. Only failures count.
    AuthFailure,
    /// HLS segment proxy, keyed by IP.
    HlsProxy,
}

impl RateBucket {
    /// Requests allowed per window.
    fn limit(self) -> u32 {
        match self {
            Self::PublicRead => 500,
            Self::AuthenticatedAction => 100,
            Self::AuthFailure => 20,
            Self::HlsProxy => 5000,
        }
    }
}

struct WindowCounter {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter shared by all request handlers.
#[derive(Default)]
pub struct RateLimiter {
    counters: DashMap<(RateBucket, String), WindowCounter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one request against the bucket. Returns `false` when the
    /// caller is over the limit.
    pub fn allow(&self, bucket: RateBucket, key: &str) -> bool {
        let mut entry = self
            .counters
            .entry((bucket, key.to_string()))
            .or_insert_with(|| WindowCounter {
                started: Instant::now(),
                count: 0,
            });

        if entry.started.elapsed() >= WINDOW {
            entry.started = Instant::now();
            entry.count = 0;
        }
        if entry.count >= bucket.limit() {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Whether the caller is currently under the limit, without counting a
    /// request. Used for failure-counting buckets.
    pub fn peek(&self, bucket: RateBucket, key: &str) -> bool {
        match self.counters.get(&(bucket, key.to_string())) {
            Some(entry) if entry.started.elapsed() < WINDOW => entry.count < bucket.limit(),
            _ => true,
        }
    }

    /// Counts one event without gating. Used to record auth failures.
    pub fn record(&self, bucket: RateBucket, key: &str) {
        let mut entry = self
            .counters
            .entry((bucket, key.to_string()))
            .or_insert_with(|| WindowCounter {
                started: Instant::now(),
                count: 0,
            });
        if entry.started.elapsed() >= WINDOW {
            entry.started = Instant::now();
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
    }

    /// Drops counters whose window has rolled over.
    pub fn cleanup(&self) {
        self.counters
            .retain(|_, counter| counter.started.elapsed() < WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_bucket_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..20 {
            assert!(limiter.allow(RateBucket::AuthFailure, "1.2.3.4"));
        }
        assert!(!limiter.allow(RateBucket::AuthFailure, "1.2.3.4"));
    }

    #[test]
    fn buckets_and_keys_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..20 {
            assert!(limiter.allow(RateBucket::AuthFailure, "1.2.3.4"));
        }
        // A different key in the same bucket is unaffected.
        assert!(limiter.allow(RateBucket::AuthFailure, "5.6.7.8"));
        // The same key in a different bucket is unaffected.
        assert!(limiter.allow(RateBucket::PublicRead, "1.2.3.4"));
    }

    #[test]
    fn peek_does_not_count_requests() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.peek(RateBucket::AuthFailure, "1.2.3.4"));
        }
        assert!(limiter.allow(RateBucket::AuthFailure, "1.2.3.4"));
    }

    #[test]
    fn recorded_failures_exhaust_the_bucket() {
        let limiter = RateLimiter::new();
        for _ in 0..20 {
            limiter.record(RateBucket::AuthFailure, "1.2.3.4");
        }
        assert!(!limiter.peek(RateBucket::AuthFailure, "1.2.3.4"));
    }

    #[test]
    fn cleanup_keeps_live_windows() {
        let limiter = RateLimiter::new();
        limiter.allow(RateBucket::PublicRead, "1.2.3.4");
        limiter.cleanup();
        // Window still live; the counter survives.
        assert!(!limiter.counters.is_empty());
    }
}
