//! Per-connection RPC rate limiting: three independent sliding windows
//! (concurrent in-flight, calls-per-second, calls-per-minute).
//!
//! Generalizes `r2e_rate_limit::RateLimiter<K>`'s single token-bucket
//! (`DashMap<K, TokenBucket>`) to three counters tracked together per
//! connection, since these quotas are plain sliding-window caps rather
//! than a refilling bucket. Timestamps are pruned lazily on each check
//! rather than on a background tick, avoiding a second task per connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::connection::ConnectionId;

pub const MAX_CONCURRENT_IN_FLIGHT: i64 = 100;
pub const MAX_CALLS_PER_SECOND: usize = 10;
pub const MAX_CALLS_PER_MINUTE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    ConcurrentInFlight,
    CallsPerSecond,
    CallsPerMinute,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitReason::ConcurrentInFlight => write!(f, "concurrent in-flight limit ({MAX_CONCURRENT_IN_FLIGHT}) exceeded"),
            RateLimitReason::CallsPerSecond => write!(f, "calls-per-second limit ({MAX_CALLS_PER_SECOND}) exceeded"),
            RateLimitReason::CallsPerMinute => write!(f, "calls-per-minute limit ({MAX_CALLS_PER_MINUTE}) exceeded"),
        }
    }
}

struct Windows {
    per_second: VecDeque<Instant>,
    per_minute: VecDeque<Instant>,
}

struct Entry {
    in_flight: AtomicI64,
    windows: Mutex<Windows>,
}

impl Entry {
    fn new() -> Self {
        Self {
            in_flight: AtomicI64::new(0),
            windows: Mutex::new(Windows { per_second: VecDeque::new(), per_minute: VecDeque::new() }),
        }
    }
}

/// Per-connection rate limiter. Cheaply cloneable; the `DashMap` is the only
/// shared state.
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    connections: std::sync::Arc<DashMap<ConnectionId, Entry>>,
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRateLimiter {
    pub fn new() -> Self {
        Self { connections: std::sync::Arc::new(DashMap::new()) }
    }

    /// Check and, if allowed, record one call for `conn` at `now`. On
    /// success, increments the concurrent in-flight counter — the caller
    /// must call [`Self::release`] once the call's response has been sent.
    pub fn try_acquire(&self, conn: ConnectionId, now: Instant) -> Result<(), RateLimitReason> {
        let entry = self.connections.entry(conn).or_insert_with(Entry::new);

        if entry.in_flight.load(Ordering::SeqCst) >= MAX_CONCURRENT_IN_FLIGHT {
            return Err(RateLimitReason::ConcurrentInFlight);
        }

        let mut windows = entry.windows.lock().expect("rate limit mutex poisoned");
        prune(&mut windows.per_second, now, Duration::from_secs(1));
        prune(&mut windows.per_minute, now, Duration::from_secs(60));

        if windows.per_second.len() >= MAX_CALLS_PER_SECOND {
            return Err(RateLimitReason::CallsPerSecond);
        }
        if windows.per_minute.len() >= MAX_CALLS_PER_MINUTE {
            return Err(RateLimitReason::CallsPerMinute);
        }

        windows.per_second.push_back(now);
        windows.per_minute.push_back(now);
        drop(windows);
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release one concurrent in-flight slot, called once a call's response
    /// has been sent (success, user error, or internal error alike).
    pub fn release(&self, conn: ConnectionId) {
        if let Some(entry) = self.connections.get(&conn) {
            entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Remove all rate-limit state for a disconnected connection.
    pub fn remove_connection(&self, conn: ConnectionId) {
        self.connections.remove(&conn);
    }

    pub fn in_flight(&self, conn: ConnectionId) -> i64 {
        self.connections.get(&conn).map(|e| e.in_flight.load(Ordering::SeqCst)).unwrap_or(0)
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(&front) = window.front() {
        if now.duration_since(front) > span {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_within_per_second_limit() {
        let limiter = ConnectionRateLimiter::new();
        let conn = ConnectionId(1);
        let now = Instant::now();
        for _ in 0..MAX_CALLS_PER_SECOND {
            assert!(limiter.try_acquire(conn, now).is_ok());
            limiter.release(conn);
        }
    }

    #[test]
    fn rejects_eleventh_call_within_one_second() {
        let limiter = ConnectionRateLimiter::new();
        let conn = ConnectionId(1);
        let now = Instant::now();
        for _ in 0..MAX_CALLS_PER_SECOND {
            limiter.try_acquire(conn, now).unwrap();
        }
        let err = limiter.try_acquire(conn, now).unwrap_err();
        assert_eq!(err, RateLimitReason::CallsPerSecond);
    }

    #[test]
    fn per_second_window_expires() {
        let limiter = ConnectionRateLimiter::new();
        let conn = ConnectionId(1);
        let t0 = Instant::now();
        for _ in 0..MAX_CALLS_PER_SECOND {
            limiter.try_acquire(conn, t0).unwrap();
        }
        let t1 = t0 + Duration::from_millis(1100);
        assert!(limiter.try_acquire(conn, t1).is_ok());
    }

    #[test]
    fn concurrent_in_flight_limit_blocks_until_release() {
        let limiter = ConnectionRateLimiter::new();
        let conn = ConnectionId(1);
        let now = Instant::now();
        for i in 0..MAX_CONCURRENT_IN_FLIGHT {
            limiter.try_acquire(conn, now + Duration::from_secs(10 * (i + 1) as u64)).unwrap();
        }
        let err = limiter.try_acquire(conn, now + Duration::from_secs(10_000)).unwrap_err();
        assert_eq!(err, RateLimitReason::ConcurrentInFlight);
        limiter.release(conn);
        assert!(limiter.try_acquire(conn, now + Duration::from_secs(10_000)).is_ok());
    }

    #[test]
    fn disconnect_clears_rate_limit_state() {
        let limiter = ConnectionRateLimiter::new();
        let conn = ConnectionId(1);
        let now = Instant::now();
        for _ in 0..MAX_CALLS_PER_SECOND {
            limiter.try_acquire(conn, now).unwrap();
        }
        limiter.remove_connection(conn);
        assert!(limiter.try_acquire(conn, now).is_ok());
    }

    #[test]
    fn independent_connections_do_not_share_quota() {
        let limiter = ConnectionRateLimiter::new();
        let now = Instant::now();
        for _ in 0..MAX_CALLS_PER_SECOND {
            limiter.try_acquire(ConnectionId(1), now).unwrap();
        }
        assert!(limiter.try_acquire(ConnectionId(2), now).is_ok());
    }
}
