//! Security events — the immutable records the threat ledger is built from.
//!
//! Events are created by the security components when something
//! security-relevant happens and are broadcast on an [`EventBus`] once
//! recorded, so in-process consumers can react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What kind of security-relevant thing happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// A caller failed authentication (reported by external services)
    AuthenticationFailure,
    /// A bearer token failed verification
    TokenInvalid,
    /// A caller exceeded its rate limit or hit a sticky block
    RateLimitExceeded,
    /// A CSRF token was missing or did not match
    CsrfViolation,
    /// An injection payload was detected in input
    InjectionAttempt,
    /// Dangerous markup was stripped from input
    XssAttempt,
    /// Input exceeded the maximum length and was truncated
    InputTruncated,
    /// Generic suspicious behaviour, counted towards auto-blocking
    SuspiciousActivity,
    /// An IP was added to the blocked set
    IpBlocked,
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationFailure => write!(f, "authentication_failure"),
            Self::TokenInvalid => write!(f, "token_invalid"),
            Self::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            Self::CsrfViolation => write!(f, "csrf_violation"),
            Self::InjectionAttempt => write!(f, "injection_attempt"),
            Self::XssAttempt => write!(f, "xss_attempt"),
            Self::InputTruncated => write!(f, "input_truncated"),
            Self::SuspiciousActivity => write!(f, "suspicious_activity"),
            Self::IpBlocked => write!(f, "ip_blocked"),
        }
    }
}

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Who triggered an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    pub ip: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

impl EventSource {
    /// IP recorded when the caller did not say where a request came from.
    /// Events from this source are never auto-blocked.
    pub const UNKNOWN_IP: &'static str = "unknown";

    /// A source identified only by its IP.
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: String::new(),
            user_id: None,
            org_id: None,
        }
    }

    /// The placeholder source used by operations that take no caller context.
    pub fn unknown() -> Self {
        Self::ip(Self::UNKNOWN_IP)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Whether this source carries a real, blockable IP.
    pub fn is_known(&self) -> bool {
        !self.ip.is_empty() && self.ip != Self::UNKNOWN_IP
    }
}

/// A single immutable security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    /// Unique identifier (UUID v4, CSPRNG-backed)
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: SecurityEventType,
    pub severity: Severity,
    pub source: EventSource,
    /// Free-form structured context
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Whether the triggering request was refused
    pub blocked: bool,
    /// What the core did in response (e.g. "rejected", "truncated")
    pub action: String,
}

impl SecurityEvent {
    /// Create a new event stamped with a fresh id and the current time.
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        source: EventSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            severity,
            source,
            details,
            timestamp: Utc::now(),
            blocked: false,
            action: "logged".into(),
        }
    }

    /// Mark whether the request was refused.
    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    /// Describe the response taken.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Override the timestamp (replaying or backdating events).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this event counts towards the per-IP suspicious counter.
    pub fn is_suspicious(&self) -> bool {
        match self.event_type {
            SecurityEventType::IpBlocked => false,
            SecurityEventType::SuspiciousActivity => true,
            _ => self.severity >= Severity::High,
        }
    }
}

/// A broadcast-based event bus for recorded security events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Subscribers that fall behind lose the oldest events, never block the ledger.
pub struct EventBus {
    sender: broadcast::Sender<Arc<SecurityEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Arc<SecurityEvent>) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SecurityEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(event_type: SecurityEventType, severity: Severity) -> SecurityEvent {
        SecurityEvent::new(
            event_type,
            severity,
            EventSource::ip("10.0.0.1"),
            serde_json::json!({ "reason": "test" }),
        )
    }

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(Arc::new(sample(
            SecurityEventType::CsrfViolation,
            Severity::High,
        )));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, SecurityEventType::CsrfViolation);
        assert_eq!(event.source.ip, "10.0.0.1");
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(Arc::new(sample(SecurityEventType::XssAttempt, Severity::Low)));
    }

    #[test]
    fn event_ids_are_unique() {
        let a = sample(SecurityEventType::TokenInvalid, Severity::Medium);
        let b = sample(SecurityEventType::TokenInvalid, Severity::Medium);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn suspicious_classification() {
        assert!(sample(SecurityEventType::SuspiciousActivity, Severity::Low).is_suspicious());
        assert!(sample(SecurityEventType::CsrfViolation, Severity::High).is_suspicious());
        assert!(!sample(SecurityEventType::TokenInvalid, Severity::Medium).is_suspicious());
        assert!(!sample(SecurityEventType::IpBlocked, Severity::Critical).is_suspicious());
    }

    #[test]
    fn unknown_source_is_not_known() {
        assert!(!EventSource::unknown().is_known());
        assert!(!EventSource::ip("").is_known());
        assert!(EventSource::ip("1.2.3.4").is_known());
    }

    #[test]
    fn event_serializes_with_type_field() {
        let event = sample(SecurityEventType::InjectionAttempt, Severity::Critical)
            .blocked(true)
            .action("rejected");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "injection_attempt");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["blocked"], true);
        assert_eq!(json["source"]["ip"], "10.0.0.1");

        let back: SecurityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.action, "rejected");
    }
}
