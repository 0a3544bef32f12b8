//! Per-command pacing for expensive queries.
//!
//! WHO and LIST debit a governor token bucket keyed by UID; the bucket
//! holds `max_ratelimit_tokens` seconds of credit. Joining a channel
//! grants one free WHO pass on top (tracked on the client), so the
//! usual join-then-WHO pattern is never penalized.

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Rate limiter for expensive commands, keyed by UID.
pub struct RateLimitManager {
    buckets: DashMap<String, DirectRateLimiter>,
    burst: NonZeroU32,
}

impl RateLimitManager {
    pub fn new(max_tokens: u32) -> Self {
        RateLimitManager {
            buckets: DashMap::new(),
            burst: NonZeroU32::new(max_tokens).unwrap_or(nonzero!(30u32)),
        }
    }

    /// Debit one token for `uid`. Returns false when the budget is spent
    /// (the command should be refused with RPL_LOAD2HI).
    pub fn check(&self, uid: &str, exempt: bool) -> bool {
        if exempt {
            return true;
        }
        let limiter = self.buckets.entry(uid.to_string()).or_insert_with(|| {
            GovRateLimiter::direct(Quota::per_second(nonzero!(1u32)).allow_burst(self.burst))
        });
        limiter.check().is_ok()
    }

    /// Forget a client's bucket on exit.
    pub fn forget(&self, uid: &str) {
        self.buckets.remove(uid);
    }

    /// Periodic cleanup so buckets for long-gone clients do not pile up.
    pub fn prune(&self, live: impl Fn(&str) -> bool) {
        self.buckets.retain(|uid, _| live(uid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausts() {
        let manager = RateLimitManager::new(3);
        let mut allowed = 0;
        for _ in 0..10 {
            if manager.check("42XAAAAAA", false) {
                allowed += 1;
            }
        }
        assert!(allowed >= 3 && allowed <= 4);
    }

    #[test]
    fn test_exempt_bypasses() {
        let manager = RateLimitManager::new(1);
        for _ in 0..100 {
            assert!(manager.check("42XAAAAAA", true));
        }
    }

    #[test]
    fn test_forget_resets() {
        let manager = RateLimitManager::new(1);
        while manager.check("42XAAAAAA", false) {}
        manager.forget("42XAAAAAA");
        assert!(manager.check("42XAAAAAA", false));
    }
}
