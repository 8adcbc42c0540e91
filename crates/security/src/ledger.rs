//! Threat ledger — the append-only event log, its statistics, and the
//! blocked-IP set.
//!
//! Appending an event and updating the statistics happen under one lock,
//! so readers of [`ThreatLedger::stats`] never observe half an event.

use chrono::{DateTime, Duration, Utc};
use ledgerguard_config::ThreatConfig;
use ledgerguard_core::{EventBus, EventSource, SecurityEvent, SecurityEventType, Severity};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Retention and auto-blocking parameters, derived from [`ThreatConfig`].
#[derive(Debug, Clone)]
pub struct ThreatPolicy {
    pub retention: Duration,
    pub suspicious_threshold: u32,
    pub suspicious_idle: Duration,
    pub max_events: usize,
}

impl From<&ThreatConfig> for ThreatPolicy {
    fn from(config: &ThreatConfig) -> Self {
        Self {
            retention: bounded_secs(config.retention_hours.saturating_mul(3600)),
            suspicious_threshold: config.suspicious_threshold,
            suspicious_idle: bounded_secs(config.suspicious_idle_secs),
            max_events: config.max_events,
        }
    }
}

/// Convert configured seconds to a `Duration`, capped at ten years so
/// timestamp arithmetic cannot overflow.
pub(crate) fn bounded_secs(secs: u64) -> Duration {
    const TEN_YEARS: u64 = 10 * 365 * 24 * 60 * 60;
    Duration::seconds(secs.min(TEN_YEARS) as i64)
}

impl Default for ThreatPolicy {
    fn default() -> Self {
        Self::from(&ThreatConfig::default())
    }
}

/// Aggregate view of the ledger.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    /// Events ever recorded (not reduced by retention cleanup)
    pub total_events: u64,
    pub events_by_type: BTreeMap<SecurityEventType, u64>,
    pub events_by_severity: BTreeMap<Severity, u64>,
    /// Keyed by source IP
    pub events_by_source: BTreeMap<String, u64>,
    pub last_hour: u64,
    pub last_24h: u64,
    /// Events whose request was refused
    pub blocked_requests: u64,
    pub rate_limited_requests: u64,
    pub blocked_ips: usize,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// An entry of the blocked-IP set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIp {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct SuspiciousCounter {
    count: u32,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    events: VecDeque<Arc<SecurityEvent>>,
    stats: SecurityStats,
    blocked: HashMap<String, BlockedIp>,
    suspicious: HashMap<String, SuspiciousCounter>,
    policy: ThreatPolicy,
}

impl LedgerState {
    /// Append an event and fold it into the statistics.
    fn append(&mut self, event: Arc<SecurityEvent>, now: DateTime<Utc>) {
        let stats = &mut self.stats;
        stats.total_events += 1;
        *stats.events_by_type.entry(event.event_type).or_default() += 1;
        *stats.events_by_severity.entry(event.severity).or_default() += 1;
        *stats
            .events_by_source
            .entry(event.source.ip.clone())
            .or_default() += 1;
        if event.timestamp > now - Duration::hours(1) {
            stats.last_hour += 1;
        }
        if event.timestamp > now - Duration::hours(24) {
            stats.last_24h += 1;
        }
        if event.blocked {
            stats.blocked_requests += 1;
        }
        if event.event_type == SecurityEventType::RateLimitExceeded {
            stats.rate_limited_requests += 1;
        }
        stats.last_event_at = Some(
            stats
                .last_event_at
                .map_or(event.timestamp, |t| t.max(event.timestamp)),
        );

        self.events.push_back(event);
        while self.events.len() > self.policy.max_events {
            self.events.pop_front();
        }
    }

    /// Add `ip` to the blocked set. Returns the `IpBlocked` event when the
    /// IP was not blocked before.
    fn block(&mut self, ip: &str, reason: &str, now: DateTime<Utc>) -> Option<Arc<SecurityEvent>> {
        if self.blocked.contains_key(ip) {
            return None;
        }
        self.blocked.insert(
            ip.to_string(),
            BlockedIp {
                ip: ip.to_string(),
                reason: reason.to_string(),
                blocked_at: now,
            },
        );
        self.suspicious.remove(ip);
        self.stats.blocked_ips = self.blocked.len();

        let event = Arc::new(
            SecurityEvent::new(
                SecurityEventType::IpBlocked,
                Severity::High,
                EventSource::ip(ip),
                serde_json::json!({ "reason": reason }),
            )
            .at(now)
            .blocked(true)
            .action("ip_blocked"),
        );
        self.append(event.clone(), now);
        Some(event)
    }

    fn recompute_rolling(&mut self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);
        self.stats.last_hour = self.events.iter().filter(|e| e.timestamp > hour_ago).count() as u64;
        self.stats.last_24h = self.events.iter().filter(|e| e.timestamp > day_ago).count() as u64;
    }
}

/// Records security events, keeps statistics, and maintains the blocked-IP set.
///
/// Thread-safe via a single `std::sync::Mutex`; no lock is held while
/// logging or broadcasting.
pub struct ThreatLedger {
    state: Mutex<LedgerState>,
    bus: EventBus,
}

impl std::fmt::Debug for ThreatLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ThreatLedger")
            .field("event_count", &state.events.len())
            .field("blocked_ips", &state.blocked.len())
            .finish()
    }
}

impl Default for ThreatLedger {
    fn default() -> Self {
        Self::new(ThreatPolicy::default())
    }
}

impl ThreatLedger {
    pub fn new(policy: ThreatPolicy) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                policy,
                ..LedgerState::default()
            }),
            bus: EventBus::default(),
        }
    }

    /// Replace the retention and auto-blocking parameters.
    pub fn set_policy(&self, policy: ThreatPolicy) {
        self.lock().policy = policy;
    }

    /// Record an event. Always succeeds.
    ///
    /// A critical event that was blocked blocks its source IP. Suspicious
    /// events count towards the source's auto-block threshold.
    pub fn record(&self, event: SecurityEvent) {
        let now = Utc::now();
        let event = Arc::new(event);
        let mut emitted = vec![event.clone()];

        {
            let mut state = self.lock();
            state.append(event.clone(), now);

            let source = &event.source;
            if source.is_known() {
                if event.severity == Severity::Critical && event.blocked {
                    let reason = format!("critical {} event", event.event_type);
                    emitted.extend(state.block(&source.ip, &reason, now));
                } else if event.is_suspicious() && !state.blocked.contains_key(&source.ip) {
                    let threshold = state.policy.suspicious_threshold;
                    let counter = state
                        .suspicious
                        .entry(source.ip.clone())
                        .or_insert(SuspiciousCounter {
                            count: 0,
                            last_seen: event.timestamp,
                        });
                    counter.count += 1;
                    counter.last_seen = counter.last_seen.max(event.timestamp);
                    if counter.count > threshold {
                        let reason = format!("{} suspicious events", counter.count);
                        emitted.extend(state.block(&source.ip, &reason, now));
                    }
                }
            }
        }

        for event in emitted {
            log_event(&event);
            self.bus.publish(event);
        }
    }

    /// Whether `ip` is in the blocked set.
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.lock().blocked.contains_key(ip)
    }

    /// Block `ip` explicitly. Returns `false` if it was already blocked.
    pub fn block(&self, ip: &str, reason: &str) -> bool {
        let event = self.lock().block(ip, reason, Utc::now());
        match event {
            Some(event) => {
                log_event(&event);
                self.bus.publish(event);
                true
            }
            None => false,
        }
    }

    /// Remove `ip` from the blocked set. Returns `false` if it was not blocked.
    pub fn unblock(&self, ip: &str) -> bool {
        let mut state = self.lock();
        let removed = state.blocked.remove(ip).is_some();
        state.suspicious.remove(ip);
        state.stats.blocked_ips = state.blocked.len();
        drop(state);

        if removed {
            info!(ip = %ip, "IP unblocked");
        }
        removed
    }

    /// A snapshot of the statistics.
    pub fn stats(&self) -> SecurityStats {
        self.lock().stats.clone()
    }

    /// The most recent `limit` events, newest first.
    pub fn events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.lock()
            .events
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.as_ref().clone())
            .collect()
    }

    /// Blocked IPs, sorted.
    pub fn blocked_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.lock().blocked.keys().cloned().collect();
        ips.sort();
        ips
    }

    /// Blocked IPs with reasons, sorted by IP.
    pub fn blocked_entries(&self) -> Vec<BlockedIp> {
        let mut entries: Vec<BlockedIp> = self.lock().blocked.values().cloned().collect();
        entries.sort_by(|a, b| a.ip.cmp(&b.ip));
        entries
    }

    /// Current suspicious-event count for `ip`.
    pub fn suspicious_count(&self, ip: &str) -> u32 {
        self.lock().suspicious.get(ip).map_or(0, |c| c.count)
    }

    /// Subscribe to recorded events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SecurityEvent>> {
        self.bus.subscribe()
    }

    /// Drop events older than the retention window and recompute the
    /// rolling counters. Returns how many events were dropped.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let cutoff = now - state.policy.retention;
        let before = state.events.len();
        state.events.retain(|e| e.timestamp >= cutoff);
        let removed = before - state.events.len();
        state.recompute_rolling(now);
        drop(state);

        if removed > 0 {
            info!(removed, "Purged expired security events");
        }
        removed
    }

    /// Evict idle suspicious counters and block every IP whose counter is
    /// over the threshold. Returns the newly blocked IPs.
    pub fn analyze_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut emitted = Vec::new();
        let mut newly_blocked = Vec::new();
        {
            let mut state = self.lock();
            let idle_cutoff = now - state.policy.suspicious_idle;
            let threshold = state.policy.suspicious_threshold;

            let before = state.suspicious.len();
            state.suspicious.retain(|_, c| c.last_seen >= idle_cutoff);
            let evicted = before - state.suspicious.len();
            if evicted > 0 {
                debug!(evicted, "Evicted idle suspicious-IP counters");
            }

            let over: Vec<(String, u32)> = state
                .suspicious
                .iter()
                .filter(|(_, c)| c.count > threshold)
                .map(|(ip, c)| (ip.clone(), c.count))
                .collect();
            for (ip, count) in over {
                let reason = format!("{count} suspicious events");
                if let Some(event) = state.block(&ip, &reason, now) {
                    emitted.push(event);
                    newly_blocked.push(ip);
                }
            }
        }

        for event in emitted {
            log_event(&event);
            self.bus.publish(event);
        }
        newly_blocked
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_event(event: &SecurityEvent) {
    let ip = event.source.ip.as_str();
    let kind = event.event_type;
    match (event.event_type, event.severity) {
        (SecurityEventType::IpBlocked, _) => {
            error!(ip = %ip, details = %event.details, "IP blocked");
        }
        (_, Severity::Critical) => error!(
            event = %kind, ip = %ip, blocked = event.blocked, action = %event.action,
            details = %event.details, "Critical security event"
        ),
        (_, Severity::High) => warn!(
            event = %kind, ip = %ip, blocked = event.blocked, action = %event.action,
            "Security event"
        ),
        (_, Severity::Medium) => info!(
            event = %kind, ip = %ip, blocked = event.blocked, action = %event.action,
            "Security event"
        ),
        (_, Severity::Low) => debug!(event = %kind, ip = %ip, "Security event"),
    }
}
