//! Shared state for the directory/heartbeat federation sub-protocol (§4.6):
//! the inbound registration rate limiter, the heartbeat-interval schedule,
//! and bookkeeping for challenges issued during verify-back.
//!
//! The actual TCP dial-back and the outbound client maintenance loop are
//! network I/O and live in the `hub` service; this module only holds the
//! state those tasks read and mutate.

use std::collections::HashMap;
use std::net::IpAddr;

use tokio::sync::RwLock;

/// 30 requests/hour per source IP via a sliding window (§4.6).
pub const REGISTER_RATE_LIMIT: usize = 30;
pub const REGISTER_RATE_WINDOW_MS: i64 = 3_600_000;

/// A verify-back challenge nobody answered within this long is abandoned
/// (the dial/verify round trip itself times out well under this).
pub const PENDING_CHALLENGE_TIMEOUT_MS: i64 = 60_000;

/// A discovered server that has missed this many seconds of heartbeats is
/// dropped from the directory (§3 DiscoveredServer: "pruned on absence").
/// Three times the largest scheduled interval, so one or two missed beats
/// under normal jitter don't flap an entry out of the list.
pub const STALE_SERVER_SILENCE_SECS: i64 = 3600 * 3;

/// Recomputes the heartbeat interval from the directory population table
/// in §4.6.
pub fn heartbeat_interval_secs(server_count: usize) -> u32 {
    match server_count {
        0..=99 => 300,
        100..=999 => 600,
        1000..=4999 => 1800,
        _ => 3600,
    }
}

/// Guards a map of per-IP sliding-window timestamps (§5).
pub struct RateLimiter {
    windows: RwLock<HashMap<IpAddr, Vec<i64>>>,
    limit: usize,
    window_ms: i64,
}

impl RateLimiter {
    pub fn new(limit: usize, window_ms: i64) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            limit,
            window_ms,
        }
    }

    /// Returns `true` when `ip` is still under the limit and records this
    /// call; returns `false` (and does not record) once the limit is hit.
    pub async fn check_and_record(&self, ip: IpAddr, now_ms: i64) -> bool {
        let mut windows = self.windows.write().await;
        let timestamps = windows.entry(ip).or_default();
        timestamps.retain(|&t| now_ms - t < self.window_ms);
        if timestamps.len() >= self.limit {
            false
        } else {
            timestamps.push(now_ms);
            true
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(REGISTER_RATE_LIMIT, REGISTER_RATE_WINDOW_MS)
    }
}

/// A challenge issued to a server we are verifying by dialing it back.
#[derive(Debug, Clone, Copy)]
pub struct PendingChallenge {
    pub challenge: u64,
    pub issued_at: i64,
}

/// Outstanding verify-back challenges, keyed by `(hostname, port)`.
#[derive(Default)]
pub struct PendingChallenges {
    inner: RwLock<HashMap<(String, u16), PendingChallenge>>,
}

impl PendingChallenges {
    pub async fn issue(&self, hostname: String, port: u16, challenge: u64, now_ms: i64) {
        self.inner.write().await.insert(
            (hostname, port),
            PendingChallenge {
                challenge,
                issued_at: now_ms,
            },
        );
    }

    /// Verifies and removes the pending challenge for `(hostname, port)`.
    /// Returns `true` only if one was outstanding and it matches.
    pub async fn verify_and_clear(&self, hostname: &str, port: u16, echoed: u64) -> bool {
        let mut inner = self.inner.write().await;
        match inner.remove(&(hostname.to_owned(), port)) {
            Some(pending) => pending.challenge == echoed,
            None => false,
        }
    }

    pub async fn prune_expired(&self, now_ms: i64, timeout_ms: i64) {
        self.inner
            .write()
            .await
            .retain(|_, pending| now_ms - pending.issued_at < timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_interval_follows_the_population_table() {
        assert_eq!(heartbeat_interval_secs(0), 300);
        assert_eq!(heartbeat_interval_secs(99), 300);
        assert_eq!(heartbeat_interval_secs(100), 600);
        assert_eq!(heartbeat_interval_secs(999), 600);
        assert_eq!(heartbeat_interval_secs(1000), 1800);
        assert_eq!(heartbeat_interval_secs(4999), 1800);
        assert_eq!(heartbeat_interval_secs(5000), 3600);
    }

    #[tokio::test]
    async fn register_is_rejected_on_the_thirty_first_call_in_an_hour() {
        let limiter = RateLimiter::new(30, 3_600_000);
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        for i in 0..30 {
            assert!(limiter.check_and_record(ip, i).await, "call {i} should pass");
        }
        assert!(!limiter.check_and_record(ip, 30).await);
    }

    #[tokio::test]
    async fn rate_limit_window_slides_forward() {
        let limiter = RateLimiter::new(1, 1000);
        let ip: IpAddr = "203.0.113.6".parse().unwrap();
        assert!(limiter.check_and_record(ip, 0).await);
        assert!(!limiter.check_and_record(ip, 500).await);
        assert!(limiter.check_and_record(ip, 1001).await);
    }

    #[tokio::test]
    async fn challenge_verification_matches_echoed_value() {
        let pending = PendingChallenges::default();
        pending.issue("peer.example".to_owned(), 6666, 12345, 0).await;
        assert!(!pending.verify_and_clear("peer.example", 6666, 1).await);
        pending.issue("peer.example".to_owned(), 6666, 12345, 0).await;
        assert!(pending.verify_and_clear("peer.example", 6666, 12345).await);
        // Already consumed.
        assert!(!pending.verify_and_clear("peer.example", 6666, 12345).await);
    }
}
