//! Fixed-window rate limiting with sticky per-window blocks.
//!
//! Each key (usually a client IP) gets a counter that lives for one window.
//! Exceeding the limit blocks the key for the rest of that window, even if
//! traffic stops. A new window starts fresh.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Map size above which expired windows are swept on the request path.
const SWEEP_THRESHOLD: usize = 10_000;

/// Per-key window state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
    pub blocked: bool,
}

impl RateLimitState {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + window,
            blocked: false,
        }
    }
}

/// Why a check came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// Within the limit
    Allowed,
    /// This request pushed the key over the limit and blocked it
    Exceeded,
    /// The key was already blocked for this window; the counter was not touched
    StillBlocked,
}

/// Result of a rate-limit check. Not an error: callers pick the response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
    #[serde(skip)]
    pub outcome: RateLimitOutcome,
}

/// In-memory fixed-window rate limiter.
///
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly). A single
/// lock serializes every state transition, so transitions for one key are
/// strictly ordered.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `key` against `limit` per `window`.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        self.check_at(key, limit, window, Utc::now())
    }

    /// Count one request as if the current time were `now`.
    pub fn check_at(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, state| state.reset_at > now);
        }

        let state = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitState::fresh(now, window));

        if now >= state.reset_at {
            *state = RateLimitState::fresh(now, window);
        }

        let (allowed, outcome) = if state.blocked {
            (false, RateLimitOutcome::StillBlocked)
        } else {
            state.count = state.count.saturating_add(1);
            if state.count > limit {
                state.blocked = true;
                (false, RateLimitOutcome::Exceeded)
            } else {
                (true, RateLimitOutcome::Allowed)
            }
        };

        RateLimitDecision {
            allowed,
            remaining: if allowed { limit - state.count } else { 0 },
            reset_at: state.reset_at,
            limit,
            outcome,
        }
    }

    /// Current state of a key, if it has one.
    pub fn state(&self, key: &str) -> Option<RateLimitState> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Drop every key whose window has ended. Returns how many were removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, state| state.reset_at > now);
        before - entries.len()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
