//! SecurityManager — the single owner of all security state.
//!
//! Wires the token service, rate limiter, CSRF guard, sanitizer, cipher and
//! threat ledger together. Every state change goes through the methods
//! here; detections on the request path are reported to the ledger as
//! security events.

use crate::cipher::{CipherBox, EncryptedPayload};
use crate::csrf::{CsrfFailure, CsrfGuard};
use crate::ledger::{BlockedIp, SecurityStats, ThreatLedger, ThreatPolicy, bounded_secs};
use crate::rate_limit::{RateLimitDecision, RateLimitOutcome, RateLimiter};
use crate::sanitize::Sanitizer;
use crate::schedule::Schedules;
use crate::token::{TokenClaims, TokenPair, TokenService, TokenType};
use chrono::Duration;
use ledgerguard_config::{SecurityConfig, SecurityConfigUpdate};
use ledgerguard_core::{
    CipherError, Error, EventSource, Result, SecurityEvent, SecurityEventType, Severity,
    TokenError,
};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Config-derived components, rebuilt together on `update_config`.
#[derive(Debug)]
struct Components {
    tokens: TokenService,
    csrf: CsrfGuard,
    sanitizer: Sanitizer,
    cipher: Arc<CipherBox>,
}

impl Components {
    fn build(config: &SecurityConfig) -> Result<Self> {
        Ok(Self {
            tokens: TokenService::new(&config.jwt),
            csrf: CsrfGuard::new(&config.csrf),
            sanitizer: Sanitizer::new(&config.sanitization),
            cipher: Arc::new(CipherBox::from_config(&config.encryption)?),
        })
    }
}

pub struct SecurityManager {
    config: RwLock<SecurityConfig>,
    components: RwLock<Components>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<ThreatLedger>,
    schedules: Mutex<Option<Schedules>>,
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("profile", &self.read_config().profile)
            .field("ledger", &self.ledger)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SecurityManager {
    /// Build a manager from a configuration.
    ///
    /// The configuration is validated first; an unusable configuration
    /// (including placeholder secrets under the production profile) is an
    /// error here rather than on first use.
    pub fn new(config: SecurityConfig) -> Result<Self> {
        config.validate().map_err(config_error)?;
        let components = Components::build(&config)?;
        let ledger = ThreatLedger::new(ThreatPolicy::from(&config.threat));

        info!(
            profile = %config.profile,
            rate_limit = config.rate_limit.max_requests,
            window_ms = config.rate_limit.window_ms,
            "Security manager initialized"
        );

        Ok(Self {
            config: RwLock::new(config),
            components: RwLock::new(components),
            limiter: Arc::new(RateLimiter::new()),
            ledger: Arc::new(ledger),
            schedules: Mutex::new(None),
        })
    }

    /// Load configuration from disk and the environment, then build.
    pub fn from_env() -> Result<Self> {
        let config = SecurityConfig::load().map_err(config_error)?;
        Self::new(config)
    }

    // ── Tokens ───────────────────────────────────────────────────────────

    /// Issue an access/refresh pair carrying `claims`.
    pub fn issue_tokens(&self, claims: &Map<String, Value>) -> TokenPair {
        self.read_components().tokens.issue(claims)
    }

    /// Verify a token of the expected kind.
    ///
    /// A failure is returned to the caller and also recorded as a
    /// medium-severity `token_invalid` event.
    pub fn verify_token(&self, token: &str, expected: TokenType) -> std::result::Result<TokenClaims, TokenError> {
        self.verify_token_from(token, expected, EventSource::unknown())
    }

    /// [`SecurityManager::verify_token`], attributing failures to `source`.
    pub fn verify_token_from(
        &self,
        token: &str,
        expected: TokenType,
        source: EventSource,
    ) -> std::result::Result<TokenClaims, TokenError> {
        let result = self.read_components().tokens.verify(token, expected);
        if let Err(err) = &result {
            self.ledger.record(
                SecurityEvent::new(
                    SecurityEventType::TokenInvalid,
                    Severity::Medium,
                    source,
                    json!({ "reason": err.code(), "expected": expected.as_str() }),
                )
                .blocked(true)
                .action("rejected"),
            );
        }
        result
    }

    /// Exchange a valid refresh token for a new pair with the same caller claims.
    pub fn refresh_tokens(&self, refresh_token: &str) -> std::result::Result<TokenPair, TokenError> {
        let claims = self.verify_token(refresh_token, TokenType::Refresh)?;
        Ok(self.issue_tokens(&claims.custom))
    }

    // ── Rate limiting ────────────────────────────────────────────────────

    /// Count one request for `key` against the configured window.
    ///
    /// `key` is treated as the caller's IP: limit violations are recorded
    /// against it and count towards its auto-block. Use
    /// [`SecurityManager::check_rate_limit_from`] for keys that are not IPs.
    /// `max_override` replaces the configured per-window limit for this
    /// call. Going over the limit is reported in the decision, never as an
    /// error.
    pub fn check_rate_limit(&self, key: &str, max_override: Option<u32>) -> RateLimitDecision {
        self.check_rate_limit_from(key, max_override, EventSource::ip(key))
    }

    /// [`SecurityManager::check_rate_limit`] for an arbitrary key (user id,
    /// API key, route), attributing violations to `source`.
    pub fn check_rate_limit_from(
        &self,
        key: &str,
        max_override: Option<u32>,
        source: EventSource,
    ) -> RateLimitDecision {
        let (limit, window) = {
            let config = self.read_config();
            (
                max_override.unwrap_or(config.rate_limit.max_requests),
                window_from_millis(config.rate_limit.window_ms),
            )
        };

        let decision = self.limiter.check(key, limit, window);
        let severity = match decision.outcome {
            RateLimitOutcome::Allowed => return decision,
            RateLimitOutcome::Exceeded => Severity::High,
            RateLimitOutcome::StillBlocked => Severity::Medium,
        };

        self.ledger.record(
            SecurityEvent::new(
                SecurityEventType::RateLimitExceeded,
                severity,
                source,
                json!({
                    "key": key,
                    "limit": decision.limit,
                    "resetAt": decision.reset_at,
                    "firstExceeded": decision.outcome == RateLimitOutcome::Exceeded,
                }),
            )
            .blocked(true)
            .action("rate_limited"),
        );
        decision
    }

    // ── CSRF ─────────────────────────────────────────────────────────────

    pub fn generate_csrf_token(&self) -> String {
        self.read_components().csrf.generate()
    }

    /// Compare a submitted token with the session's copy.
    pub fn verify_csrf_token(&self, token: &str, session_token: &str) -> bool {
        self.verify_csrf_token_from(token, session_token, EventSource::unknown())
    }

    /// [`SecurityManager::verify_csrf_token`], attributing failures to `source`.
    pub fn verify_csrf_token_from(&self, token: &str, session_token: &str, source: EventSource) -> bool {
        let outcome = self
            .read_components()
            .csrf
            .check(Some(token), Some(session_token));
        self.csrf_outcome(outcome, source)
    }

    /// A token bound to `session_id`; see [`CsrfGuard::generate_for_session`].
    pub fn generate_session_csrf_token(&self, session_id: &str) -> String {
        self.read_components().csrf.generate_for_session(session_id)
    }

    pub fn verify_session_csrf_token(&self, token: &str, session_id: &str, source: EventSource) -> bool {
        let outcome = self
            .read_components()
            .csrf
            .check_for_session(token, session_id);
        self.csrf_outcome(outcome, source)
    }

    fn csrf_outcome(&self, outcome: std::result::Result<(), CsrfFailure>, source: EventSource) -> bool {
        match outcome {
            Ok(()) => true,
            Err(failure) => {
                self.ledger.record(
                    SecurityEvent::new(
                        SecurityEventType::CsrfViolation,
                        Severity::High,
                        source,
                        json!({ "reason": failure.as_str() }),
                    )
                    .blocked(true)
                    .action("rejected"),
                );
                false
            }
        }
    }

    // ── Sanitization ─────────────────────────────────────────────────────

    /// Clean untrusted text. Never fails; an injection payload yields `""`.
    pub fn sanitize_input(&self, raw: &str) -> String {
        self.sanitize_input_from(raw, EventSource::unknown())
    }

    /// [`SecurityManager::sanitize_input`], attributing detections to `source`.
    pub fn sanitize_input_from(&self, raw: &str, source: EventSource) -> String {
        let report = self.read_components().sanitizer.sanitize(raw);

        if let Some(original) = report.truncated_from {
            self.ledger.record(
                SecurityEvent::new(
                    SecurityEventType::InputTruncated,
                    Severity::Medium,
                    source.clone(),
                    json!({ "originalLength": original, "keptLength": report.output.chars().count() }),
                )
                .action("truncated"),
            );
        }
        if report.markup_stripped {
            self.ledger.record(
                SecurityEvent::new(
                    SecurityEventType::XssAttempt,
                    Severity::Low,
                    source.clone(),
                    json!({ "inputLength": raw.len() }),
                )
                .action("stripped"),
            );
        }
        if let Some(pattern) = report.injection {
            self.ledger.record(
                SecurityEvent::new(
                    SecurityEventType::InjectionAttempt,
                    Severity::Critical,
                    source,
                    json!({ "pattern": pattern, "inputLength": raw.len() }),
                )
                .blocked(true)
                .action("rejected"),
            );
        }

        report.output
    }

    // ── Encryption ───────────────────────────────────────────────────────

    pub fn encrypt(&self, plaintext: &[u8]) -> std::result::Result<EncryptedPayload, CipherError> {
        self.cipher().encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> std::result::Result<Vec<u8>, CipherError> {
        let result = self.cipher().decrypt(ciphertext, iv, tag);
        if let Err(err) = &result {
            warn!(error = %err, "Decryption failed");
        }
        result
    }

    fn cipher(&self) -> Arc<CipherBox> {
        self.read_components().cipher.clone()
    }

    // ── Threat ledger ────────────────────────────────────────────────────

    pub fn record_security_event(&self, event: SecurityEvent) {
        self.ledger.record(event);
    }

    pub fn is_ip_blocked(&self, ip: &str) -> bool {
        self.ledger.is_blocked(ip)
    }

    /// Block `ip`. Returns `false` if it was already blocked.
    pub fn block_ip(&self, ip: &str, reason: &str) -> bool {
        self.ledger.block(ip, reason)
    }

    /// Unblock `ip`. Returns `false` if it was not blocked.
    pub fn unblock_ip(&self, ip: &str) -> bool {
        self.ledger.unblock(ip)
    }

    pub fn get_stats(&self) -> SecurityStats {
        self.ledger.stats()
    }

    /// The most recent `limit` events, newest first.
    pub fn get_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.ledger.events(limit)
    }

    pub fn get_blocked_ips(&self) -> Vec<String> {
        self.ledger.blocked_ips()
    }

    pub fn blocked_entries(&self) -> Vec<BlockedIp> {
        self.ledger.blocked_entries()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SecurityEvent>> {
        self.ledger.subscribe()
    }

    pub fn ledger(&self) -> &ThreatLedger {
        &self.ledger
    }

    // ── Configuration ────────────────────────────────────────────────────

    pub fn get_config(&self) -> SecurityConfig {
        self.read_config().clone()
    }

    /// Apply a partial update and rebuild the affected components.
    ///
    /// Nothing changes if the merged configuration does not validate. The
    /// cipher is only rebuilt when the encryption section changed, so an
    /// ephemeral development key survives unrelated updates. Schedule
    /// intervals take effect on the next `start`.
    pub fn update_config(&self, update: &SecurityConfigUpdate) -> Result<SecurityConfig> {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        let next = config.merged(update).map_err(config_error)?;

        let encryption_changed = next.encryption.key != config.encryption.key
            || next.encryption.associated_data != config.encryption.associated_data;
        let cipher = if encryption_changed {
            Arc::new(CipherBox::from_config(&next.encryption)?)
        } else {
            self.cipher()
        };

        {
            let mut components = self.components.write().unwrap_or_else(|e| e.into_inner());
            *components = Components {
                tokens: TokenService::new(&next.jwt),
                csrf: CsrfGuard::new(&next.csrf),
                sanitizer: Sanitizer::new(&next.sanitization),
                cipher,
            };
        }
        self.ledger.set_policy(ThreatPolicy::from(&next.threat));

        *config = next;
        info!(profile = %config.profile, encryption_changed, "Security configuration updated");
        Ok(config.clone())
    }

    /// `Set-Cookie` attributes for the session cookie.
    pub fn session_cookie_attributes(&self) -> String {
        self.read_config().session.cookie_attributes()
    }

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Run one retention pass now. Returns how many events were purged.
    pub fn run_cleanup(&self) -> usize {
        let now = chrono::Utc::now();
        let purged = self.ledger.cleanup_at(now);
        let windows = self.limiter.prune_expired(now);
        debug!(purged, windows, "Manual cleanup finished");
        purged
    }

    /// Run one threat-analysis pass now. Returns the newly blocked IPs.
    pub fn run_threat_analysis(&self) -> Vec<String> {
        self.ledger.analyze_at(chrono::Utc::now())
    }

    /// Start the cleanup and analysis schedules. Returns `false` if they are
    /// already running. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut schedules = self.schedules.lock().unwrap_or_else(|e| e.into_inner());
        if schedules.is_some() {
            return false;
        }
        let (cleanup, analysis) = {
            let config = self.read_config();
            (
                std::time::Duration::from_secs(config.threat.cleanup_interval_secs),
                std::time::Duration::from_secs(config.threat.analysis_interval_secs),
            )
        };
        *schedules = Some(Schedules::spawn(
            self.ledger.clone(),
            self.limiter.clone(),
            cleanup,
            analysis,
        ));
        true
    }

    /// Stop the schedules and wait for them to exit.
    pub async fn shutdown(&self) {
        let schedules = self
            .schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(schedules) = schedules {
            schedules.shutdown().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn read_config(&self) -> RwLockReadGuard<'_, SecurityConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn read_components(&self) -> RwLockReadGuard<'_, Components> {
        self.components.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn config_error(err: ledgerguard_config::ConfigError) -> Error {
    Error::Config {
        message: err.to_string(),
    }
}

fn window_from_millis(ms: u64) -> Duration {
    bounded_secs(ms / 1000) + Duration::milliseconds((ms % 1000) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerguard_config::Profile;

    fn manager() -> SecurityManager {
        SecurityManager::new(SecurityConfig::default()).unwrap()
    }

    fn claims() -> Map<String, Value> {
        let mut claims = Map::new();
        claims.insert("userId".into(), json!("u-1"));
        claims.insert("orgId".into(), json!("org-9"));
        claims
    }

    #[test]
    fn production_placeholders_are_fatal() {
        let config = SecurityConfig {
            profile: Profile::Production,
            ..SecurityConfig::default()
        };
        assert!(matches!(
            SecurityManager::new(config),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn failed_verification_is_returned_and_recorded() {
        let m = manager();
        let err = m.verify_token("garbage", TokenType::Access).unwrap_err();
        assert!(matches!(err, TokenError::InvalidFormat(_)));

        let events = m.get_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::TokenInvalid);
        assert_eq!(events[0].severity, Severity::Medium);
        assert_eq!(events[0].details["reason"], "invalid_format");
    }

    #[test]
    fn successful_verification_records_nothing() {
        let m = manager();
        let pair = m.issue_tokens(&claims());
        assert!(m.verify_token(&pair.access_token, TokenType::Access).is_ok());
        assert_eq!(m.get_stats().total_events, 0);
    }

    #[test]
    fn refresh_issues_new_pair_with_same_claims() {
        let m = manager();
        let pair = m.issue_tokens(&claims());
        let refreshed = m.refresh_tokens(&pair.refresh_token).unwrap();
        let verified = m.verify_token(&refreshed.access_token, TokenType::Access).unwrap();
        assert_eq!(verified.custom, claims());

        assert!(matches!(
            m.refresh_tokens(&pair.access_token),
            Err(TokenError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rate_limit_events_follow_outcome() {
        let m = manager();
        for _ in 0..3 {
            assert!(m.check_rate_limit("9.9.9.9", Some(3)).allowed);
        }
        assert_eq!(m.get_stats().total_events, 0);

        assert!(!m.check_rate_limit("9.9.9.9", Some(3)).allowed);
        assert!(!m.check_rate_limit("9.9.9.9", Some(3)).allowed);

        let events = m.get_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].severity, Severity::Medium);
        assert_eq!(events[1].severity, Severity::High);
        assert!(events.iter().all(|e| e.blocked));
        assert_eq!(m.get_stats().rate_limited_requests, 2);
    }

    #[test]
    fn rate_limit_by_user_id_does_not_block_ips() {
        let m = SecurityManager::new(SecurityConfig {
            threat: ledgerguard_config::ThreatConfig {
                suspicious_threshold: 1,
                ..Default::default()
            },
            ..SecurityConfig::default()
        })
        .unwrap();

        for _ in 0..4 {
            m.check_rate_limit_from("user:u-1", Some(1), EventSource::unknown());
        }
        assert!(m.get_blocked_ips().is_empty());
        assert_eq!(m.get_events(1)[0].details["key"], "user:u-1");

        // Attributed to the caller's IP, each first violation counts
        for key in ["user:u-2", "user:u-3"] {
            for _ in 0..2 {
                m.check_rate_limit_from(key, Some(1), EventSource::ip("10.1.1.1"));
            }
        }
        assert!(m.is_ip_blocked("10.1.1.1"));
        assert!(!m.is_ip_blocked("user:u-2"));
    }

    #[test]
    fn csrf_failures_are_recorded() {
        let m = manager();
        let t = m.generate_csrf_token();
        assert!(m.verify_csrf_token(&t, &t));
        assert!(!m.verify_csrf_token(&t, "other"));
        assert!(!m.verify_csrf_token("", &t));

        let events = m.get_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].details["reason"], "missing_token");
        assert_eq!(events[1].details["reason"], "token_mismatch");
    }

    #[test]
    fn session_csrf_roundtrip() {
        let m = manager();
        let source = EventSource::ip("7.7.7.7");
        let t = m.generate_session_csrf_token("sess-1");
        assert!(m.verify_session_csrf_token(&t, "sess-1", source.clone()));
        assert!(!m.verify_session_csrf_token(&t, "sess-2", source));
        assert_eq!(m.get_events(10)[0].source.ip, "7.7.7.7");
    }

    #[test]
    fn sanitize_records_per_detection() {
        let m = manager();
        assert_eq!(m.sanitize_input("<b>ok</b>"), "<b>ok</b>");
        assert_eq!(m.get_stats().total_events, 0);

        assert_eq!(m.sanitize_input("<script>x()</script>hi"), "hi");
        assert_eq!(m.get_events(1)[0].event_type, SecurityEventType::XssAttempt);
        assert_eq!(m.get_events(1)[0].severity, Severity::Low);
    }

    #[test]
    fn injection_from_known_source_blocks_ip() {
        let m = manager();
        let out = m.sanitize_input_from("1; DROP TABLE users", EventSource::ip("6.6.6.6"));
        assert_eq!(out, "");
        assert!(m.is_ip_blocked("6.6.6.6"));
    }

    #[test]
    fn injection_from_unknown_source_blocks_nothing() {
        let m = manager();
        assert_eq!(m.sanitize_input("1; DROP TABLE users"), "");
        assert!(m.get_blocked_ips().is_empty());
        let stats = m.get_stats();
        assert_eq!(stats.events_by_severity.get(&Severity::Critical), Some(&1));
    }

    #[test]
    fn decrypt_with_flipped_tag_fails() {
        let m = manager();
        let sealed = m.encrypt(b"secret").unwrap();
        let mut tag = sealed.tag.clone();
        tag[0] ^= 1;
        assert!(m.decrypt(&sealed.ciphertext, &sealed.iv, &tag).is_err());
        assert_eq!(m.decrypt(&sealed.ciphertext, &sealed.iv, &sealed.tag).unwrap(), b"secret");
    }

    #[test]
    fn update_config_applies_and_rebuilds() {
        let m = manager();
        let old = m.issue_tokens(&claims());
        let sealed = m.encrypt(b"kept").unwrap();

        let updated = m
            .update_config(&SecurityConfigUpdate {
                jwt_access_secret: Some("a-rotated-access-secret".into()),
                rate_limit_max_requests: Some(2),
                ..SecurityConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(updated.rate_limit.max_requests, 2);
        assert_eq!(m.get_config().rate_limit.max_requests, 2);

        // Old access tokens no longer verify after rotation
        assert!(m.verify_token(&old.access_token, TokenType::Access).is_err());
        // Ephemeral key survives an unrelated update
        assert_eq!(m.decrypt(&sealed.ciphertext, &sealed.iv, &sealed.tag).unwrap(), b"kept");
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let m = manager();
        let result = m.update_config(&SecurityConfigUpdate {
            rate_limit_max_requests: Some(0),
            ..SecurityConfigUpdate::default()
        });
        assert!(result.is_err());
        assert_eq!(m.get_config().rate_limit.max_requests, 100);
    }

    #[test]
    fn window_conversion_keeps_millis() {
        assert_eq!(window_from_millis(1_500), Duration::milliseconds(1_500));
        assert_eq!(window_from_millis(900_000), Duration::minutes(15));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_stops() {
        let m = manager();
        assert!(m.start());
        assert!(!m.start());
        assert!(m.is_running());
        m.shutdown().await;
        assert!(!m.is_running());
    }
}
