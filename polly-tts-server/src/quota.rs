//! Per-client request quota.
//!
//! Each client identity owns a [`QuotaRecord`] counting admitted requests in
//! a fixed window that starts with the first request. Expired records are
//! replaced lazily on the next access; [`QuotaStore::purge_expired`] drops
//! the ones nobody comes back for.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use polly_tts_common::Config;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

/// Who a request is accounted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity used when the peer address cannot be determined.
    pub const UNKNOWN: &'static str = "unknown";

    /// Create an identity from any string key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Identity for callers whose address is unknown.
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// The identity key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientIdentity {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Limit and window applied to every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Requests admitted per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl QuotaPolicy {
    /// Create a policy.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Policy from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_requests, config.window)
    }
}

#[derive(Debug, Clone, Copy)]
struct QuotaRecord {
    count: u32,
    window_start: Instant,
}

impl QuotaRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    fn reset_after(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Outcome of [`QuotaStore::check_and_increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured limit
    pub limit: u32,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Read-only view returned by [`QuotaStore::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Configured limit
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// In-memory quota records keyed by client identity.
///
/// Updates to one identity are serialized by the map's shard lock, so two
/// concurrent requests from the same client can never both take the last
/// slot.
pub struct QuotaStore {
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
    records: DashMap<ClientIdentity, QuotaRecord>,
}

impl QuotaStore {
    /// Create a store using the system clock.
    pub fn new(policy: QuotaPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(policy: QuotaPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            records: DashMap::new(),
        }
    }

    /// The policy applied by this store.
    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Count a request against `identity` if it still has quota.
    ///
    /// A rejected attempt does not consume anything.
    pub fn check_and_increment(&self, identity: &ClientIdentity) -> QuotaDecision {
        let QuotaPolicy { limit, window } = self.policy;
        let now = self.clock.now();

        let mut record = self
            .records
            .entry(identity.clone())
            .or_insert_with(|| QuotaRecord::fresh(now));

        if record.is_expired(now, window) {
            trace!(client = %identity, "Quota window elapsed, starting a new one");
            *record = QuotaRecord::fresh(now);
        }

        let reset_after = record.reset_after(now, window);

        if record.count < limit {
            record.count += 1;
            let remaining = limit - record.count;
            debug!(client = %identity, remaining, "Request admitted");
            QuotaDecision {
                allowed: true,
                limit,
                remaining,
                reset_after,
            }
        } else {
            debug!(client = %identity, "Request rejected, quota exhausted");
            QuotaDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_after,
            }
        }
    }

    /// Requests `identity` may still make in its current window.
    pub fn remaining(&self, identity: &ClientIdentity) -> u32 {
        self.status(identity).remaining
    }

    /// Quota state of `identity` without changing it.
    pub fn status(&self, identity: &ClientIdentity) -> QuotaStatus {
        let QuotaPolicy { limit, window } = self.policy;
        let now = self.clock.now();

        match self.records.get(identity) {
            Some(record) if !record.is_expired(now, window) => QuotaStatus {
                limit,
                remaining: limit.saturating_sub(record.count),
                reset_after: record.reset_after(now, window),
            },
            _ => QuotaStatus {
                limit,
                remaining: limit,
                reset_after: window,
            },
        }
    }

    /// Drop every record whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let window = self.policy.window;
        let now = self.clock.now();
        let mut removed = 0;

        self.records.retain(|_, record| {
            let keep = !record.is_expired(now, window);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(removed, tracked = self.records.len(), "Purged expired quota records");
        }
        removed
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn store(limit: u32) -> (QuotaStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let store = QuotaStore::with_clock(QuotaPolicy::new(limit, DAY), clock.clone());
        (store, clock)
    }

    fn client(name: &str) -> ClientIdentity {
        ClientIdentity::new(name)
    }

    #[test]
    fn test_first_request_is_admitted() {
        let (store, _) = store(12);
        let decision = store.check_and_increment(&client("a"));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 11);
        assert_eq!(decision.limit, 12);
        assert_eq!(decision.reset_after, DAY);
    }

    #[test]
    fn test_limit_plus_one_is_rejected() {
        let (store, _) = store(12);
        let id = client("a");

        for expected_remaining in (0..12).rev() {
            let decision = store.check_and_increment(&id);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = store.check_and_increment(&id);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_rejection_does_not_consume() {
        let (store, clock) = store(1);
        let id = client("a");

        assert!(store.check_and_increment(&id).allowed);
        for _ in 0..5 {
            assert!(!store.check_and_increment(&id).allowed);
        }

        clock.advance(DAY);
        let decision = store.check_and_increment(&id);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_window_expiry_resets_quota() {
        let (store, clock) = store(12);
        let id = client("a");

        for _ in 0..12 {
            store.check_and_increment(&id);
        }
        assert!(!store.check_and_increment(&id).allowed);

        clock.advance(DAY - Duration::from_secs(1));
        assert!(!store.check_and_increment(&id).allowed);

        clock.advance(Duration::from_secs(1));
        let decision = store.check_and_increment(&id);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 11);
        assert_eq!(decision.reset_after, DAY);
    }

    #[test]
    fn test_reset_after_counts_down() {
        let (store, clock) = store(3);
        let id = client("a");

        store.check_and_increment(&id);
        clock.advance(Duration::from_secs(3600));
        let decision = store.check_and_increment(&id);
        assert_eq!(decision.reset_after, DAY - Duration::from_secs(3600));
        assert_eq!(store.status(&id).reset_after, DAY - Duration::from_secs(3600));
    }

    #[test]
    fn test_remaining_for_unknown_identity_is_full() {
        let (store, _) = store(12);
        assert_eq!(store.remaining(&client("nobody")), 12);
        assert!(store.is_empty(), "status reads must not create records");
    }

    #[test]
    fn test_remaining_does_not_mutate() {
        let (store, _) = store(2);
        let id = client("a");

        for _ in 0..100 {
            assert_eq!(store.remaining(&id), 2);
        }
        assert_eq!(store.check_and_increment(&id).remaining, 1);
        for _ in 0..100 {
            assert_eq!(store.remaining(&id), 1);
        }
        assert_eq!(store.check_and_increment(&id).remaining, 0);
        assert!(!store.check_and_increment(&id).allowed);
    }

    #[test]
    fn test_remaining_after_expiry_is_full() {
        let (store, clock) = store(4);
        let id = client("a");
        store.check_and_increment(&id);
        store.check_and_increment(&id);
        assert_eq!(store.remaining(&id), 2);

        clock.advance(DAY);
        let status = store.status(&id);
        assert_eq!(status.remaining, 4);
        assert_eq!(status.reset_after, DAY);
    }

    #[test]
    fn test_identities_are_independent() {
        let (store, _) = store(1);
        assert!(store.check_and_increment(&client("a")).allowed);
        assert!(!store.check_and_increment(&client("a")).allowed);
        assert!(store.check_and_increment(&client("b")).allowed);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_purge_expired_removes_only_elapsed_records() {
        let (store, clock) = store(5);
        store.check_and_increment(&client("old"));
        clock.advance(DAY / 2);
        store.check_and_increment(&client("new"));

        assert_eq!(store.purge_expired(), 0);

        clock.advance(DAY / 2);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remaining(&client("new")), 4);
    }

    #[test]
    fn test_concurrent_requests_never_overshoot() {
        let (store, _) = store(12);
        let id = client("burst");
        let admitted = std::sync::atomic::AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        if store.check_and_increment(&id).allowed {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 12);
        assert_eq!(store.remaining(&id), 0);
    }

    #[test]
    fn test_identity_from_ip() {
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        let id = ClientIdentity::from(ip);
        assert_eq!(id.as_str(), "203.0.113.7");
        assert_eq!(id.to_string(), "203.0.113.7");
        assert_eq!(ClientIdentity::unknown().as_str(), "unknown");
    }

    #[test]
    fn test_policy_from_config() {
        let config = Config {
            max_requests: 10,
            window: Duration::from_secs(60),
            ..Config::default()
        };
        let policy = QuotaPolicy::from_config(&config);
        assert_eq!(policy, QuotaPolicy::new(10, Duration::from_secs(60)));
    }
}
