//! Configuration loading, validation, and management for LedgerGuard.
//!
//! Loads configuration from `~/.ledgerguard/config.toml` (or the file named
//! by `LEDGERGUARD_CONFIG`) with environment variable overrides. Validates
//! all settings at startup; a production profile with empty or placeholder
//! secrets is rejected outright.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Signing secret used when none is configured. Rejected in production.
pub const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
/// Refresh signing secret used when none is configured. Rejected in production.
pub const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";
/// CSRF secret used when none is configured. Rejected in production.
pub const DEV_CSRF_SECRET: &str = "dev-csrf-secret-change-me";

/// Minimum secret length accepted by the production profile, in bytes.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// The only cipher the core implements.
pub const SUPPORTED_ALGORITHM: &str = "aes-256-gcm";

/// The root configuration structure.
///
/// Maps directly to `~/.ledgerguard/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Deployment profile; `production` enables strict secret checks
    #[serde(default)]
    pub profile: Profile,

    /// Bearer token signing
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Fixed-window rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Anti-forgery tokens
    #[serde(default)]
    pub csrf: CsrfConfig,

    /// Input sanitization
    #[serde(default)]
    pub sanitization: SanitizationConfig,

    /// Symmetric encryption
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Session cookie policy
    #[serde(default)]
    pub session: SessionConfig,

    /// Threat ledger retention and auto-blocking
    #[serde(default)]
    pub threat: ThreatConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Development,
    Production,
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::ValidationError(format!(
                "unknown profile '{other}' (expected development or production)"
            ))),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &str) -> &'static str {
    if s.is_empty() { "[EMPTY]" } else { "[REDACTED]" }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_access_secret")]
    pub access_secret: String,

    #[serde(default = "default_refresh_secret")]
    pub refresh_secret: String,

    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,

    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,
}

fn default_access_secret() -> String {
    DEV_ACCESS_SECRET.into()
}
fn default_refresh_secret() -> String {
    DEV_REFRESH_SECRET.into()
}
fn default_access_ttl() -> u64 {
    15 * 60
}
fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn default_issuer() -> String {
    "ledgerguard".into()
}
fn default_audience() -> String {
    "ledgerguard-api".into()
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_secret: default_access_secret(),
            refresh_secret: default_refresh_secret(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_secret", &redact(&self.access_secret))
            .field("refresh_secret", &redact(&self.refresh_secret))
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests allowed per key per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window_ms() -> u64 {
    15 * 60 * 1000
}
fn default_max_requests() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Keys session-bound tokens
    #[serde(default = "default_csrf_secret")]
    pub secret: String,

    /// Random bytes per token (hex doubles the printed length)
    #[serde(default = "default_token_length")]
    pub token_length: usize,

    #[serde(default = "default_csrf_cookie")]
    pub cookie_name: String,

    #[serde(default = "default_csrf_header")]
    pub header_name: String,
}

fn default_csrf_secret() -> String {
    DEV_CSRF_SECRET.into()
}
fn default_token_length() -> usize {
    32
}
fn default_csrf_cookie() -> String {
    "__Host-csrf".into()
}
fn default_csrf_header() -> String {
    "x-csrf-token".into()
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret: default_csrf_secret(),
            token_length: default_token_length(),
            cookie_name: default_csrf_cookie(),
            header_name: default_csrf_header(),
        }
    }
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("secret", &redact(&self.secret))
            .field("token_length", &self.token_length)
            .field("cookie_name", &self.cookie_name)
            .field("header_name", &self.header_name)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizationConfig {
    /// Tags that survive sanitization (everything else is unwrapped)
    #[serde(default = "default_allowed_tags")]
    pub allowed_tags: Vec<String>,

    /// Attributes kept on allowed tags
    #[serde(default = "default_allowed_attributes")]
    pub allowed_attributes: Vec<String>,

    /// Maximum input length in characters before truncation
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

fn default_allowed_tags() -> Vec<String> {
    ["b", "i", "em", "strong", "a", "p", "br", "ul", "ol", "li", "code", "pre"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_allowed_attributes() -> Vec<String> {
    vec!["href".into(), "title".into()]
}
fn default_max_length() -> usize {
    10_000
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            allowed_tags: default_allowed_tags(),
            allowed_attributes: default_allowed_attributes(),
            max_length: default_max_length(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Base64-encoded 32-byte key. Dedicated to encryption, never a signing secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default = "default_iv_length")]
    pub iv_length: usize,

    #[serde(default = "default_tag_length")]
    pub tag_length: usize,

    /// Bound into every ciphertext as additional authenticated data
    #[serde(default = "default_associated_data")]
    pub associated_data: String,
}

fn default_algorithm() -> String {
    SUPPORTED_ALGORITHM.into()
}
fn default_iv_length() -> usize {
    12
}
fn default_tag_length() -> usize {
    16
}
fn default_associated_data() -> String {
    "ledgerguard:v1".into()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            key: None,
            iv_length: default_iv_length(),
            tag_length: default_tag_length(),
            associated_data: default_associated_data(),
        }
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("algorithm", &self.algorithm)
            .field("key", &self.key.as_deref().map(redact))
            .field("iv_length", &self.iv_length)
            .field("tag_length", &self.tag_length)
            .field("associated_data", &self.associated_data)
            .finish()
    }
}

impl EncryptionConfig {
    /// Decode the configured key. `Ok(None)` when no key is configured.
    pub fn key_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(encoded) = &self.key else {
            return Ok(None);
        };
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| {
            ConfigError::ValidationError(format!("encryption.key is not valid base64: {e}"))
        })?;
        if bytes.len() != 32 {
            return Err(ConfigError::ValidationError(format!(
                "encryption.key must decode to 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Some(bytes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default = "default_true")]
    pub http_only: bool,

    /// "strict", "lax" or "none"
    #[serde(default = "default_same_site")]
    pub same_site: String,

    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
}

fn default_session_cookie() -> String {
    "ledgerguard.sid".into()
}
fn default_same_site() -> String {
    "strict".into()
}
fn default_session_max_age() -> u64 {
    24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            secure: true,
            http_only: true,
            same_site: default_same_site(),
            max_age_secs: default_session_max_age(),
        }
    }
}

impl SessionConfig {
    /// Render the cookie attributes of the session policy, e.g.
    /// `Path=/; Max-Age=86400; HttpOnly; Secure; SameSite=Strict`.
    pub fn cookie_attributes(&self) -> String {
        let mut attrs = format!("Path=/; Max-Age={}", self.max_age_secs);
        if self.http_only {
            attrs.push_str("; HttpOnly");
        }
        if self.secure {
            attrs.push_str("; Secure");
        }
        let same_site = match self.same_site.to_ascii_lowercase().as_str() {
            "lax" => "Lax",
            "none" => "None",
            _ => "Strict",
        };
        attrs.push_str("; SameSite=");
        attrs.push_str(same_site);
        attrs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatConfig {
    /// Events older than this are purged by the cleanup schedule
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_analysis_interval")]
    pub analysis_interval_secs: u64,

    /// Suspicious events per IP above which the IP is auto-blocked
    #[serde(default = "default_suspicious_threshold")]
    pub suspicious_threshold: u32,

    /// Suspicious counters idle for longer than this are evicted
    #[serde(default = "default_suspicious_idle")]
    pub suspicious_idle_secs: u64,

    /// Upper bound on events kept in memory
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_retention_hours() -> u64 {
    24
}
fn default_cleanup_interval() -> u64 {
    60 * 60
}
fn default_analysis_interval() -> u64 {
    5 * 60
}
fn default_suspicious_threshold() -> u32 {
    10
}
fn default_suspicious_idle() -> u64 {
    60 * 60
}
fn default_max_events() -> usize {
    10_000
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            cleanup_interval_secs: default_cleanup_interval(),
            analysis_interval_secs: default_analysis_interval(),
            suspicious_threshold: default_suspicious_threshold(),
            suspicious_idle_secs: default_suspicious_idle(),
            max_events: default_max_events(),
        }
    }
}

/// A partial configuration change. Every field is optional; unset fields
/// keep their current value. Unknown fields are rejected when deserializing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfigUpdate {
    pub profile: Option<Profile>,
    pub jwt_access_secret: Option<String>,
    pub jwt_refresh_secret: Option<String>,
    pub access_token_ttl_secs: Option<u64>,
    pub refresh_token_ttl_secs: Option<u64>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub rate_limit_window_ms: Option<u64>,
    pub rate_limit_max_requests: Option<u32>,
    pub csrf_secret: Option<String>,
    pub csrf_token_length: Option<usize>,
    pub csrf_cookie_name: Option<String>,
    pub csrf_header_name: Option<String>,
    pub allowed_tags: Option<Vec<String>>,
    pub allowed_attributes: Option<Vec<String>>,
    pub max_input_length: Option<usize>,
    pub encryption_key: Option<String>,
    pub associated_data: Option<String>,
    pub session_secure: Option<bool>,
    pub session_same_site: Option<String>,
    pub session_max_age_secs: Option<u64>,
    pub retention_hours: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub analysis_interval_secs: Option<u64>,
    pub suspicious_threshold: Option<u32>,
    pub suspicious_idle_secs: Option<u64>,
    pub max_events: Option<usize>,
}

macro_rules! apply_field {
    ($update:expr, $field:ident => $target:expr) => {
        if let Some(value) = &$update.$field {
            $target = value.clone();
        }
    };
}

impl SecurityConfig {
    /// Load configuration from the default path, apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("LEDGERGUARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_from(&path)
    }

    /// Load configuration from a specific file path, apply environment
    /// overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_from(path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without validating it. Missing file = defaults.
    pub fn read_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply `LEDGERGUARD_*` overrides, reading variables through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(profile) = lookup("LEDGERGUARD_PROFILE") {
            self.profile = profile.parse()?;
        }
        if let Some(secret) = lookup("LEDGERGUARD_JWT_ACCESS_SECRET") {
            self.jwt.access_secret = secret;
        }
        if let Some(secret) = lookup("LEDGERGUARD_JWT_REFRESH_SECRET") {
            self.jwt.refresh_secret = secret;
        }
        if let Some(secret) = lookup("LEDGERGUARD_CSRF_SECRET") {
            self.csrf.secret = secret;
        }
        if let Some(key) = lookup("LEDGERGUARD_ENCRYPTION_KEY") {
            self.encryption.key = Some(key);
        }
        if let Some(max) = lookup("LEDGERGUARD_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = max.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LEDGERGUARD_RATE_LIMIT_MAX must be an integer, got '{max}'"
                ))
            })?;
        }
        if let Some(window) = lookup("LEDGERGUARD_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = window.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LEDGERGUARD_RATE_LIMIT_WINDOW_MS must be an integer, got '{window}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ledgerguard")
    }

    pub fn is_production(&self) -> bool {
        self.profile == Profile::Production
    }

    /// Build a new configuration with `update` applied, validating the result.
    /// `self` is left untouched when validation fails.
    pub fn merged(&self, update: &SecurityConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        apply_field!(update, profile => next.profile);
        apply_field!(update, jwt_access_secret => next.jwt.access_secret);
        apply_field!(update, jwt_refresh_secret => next.jwt.refresh_secret);
        apply_field!(update, access_token_ttl_secs => next.jwt.access_token_ttl_secs);
        apply_field!(update, refresh_token_ttl_secs => next.jwt.refresh_token_ttl_secs);
        apply_field!(update, issuer => next.jwt.issuer);
        apply_field!(update, audience => next.jwt.audience);
        apply_field!(update, rate_limit_window_ms => next.rate_limit.window_ms);
        apply_field!(update, rate_limit_max_requests => next.rate_limit.max_requests);
        apply_field!(update, csrf_secret => next.csrf.secret);
        apply_field!(update, csrf_token_length => next.csrf.token_length);
        apply_field!(update, csrf_cookie_name => next.csrf.cookie_name);
        apply_field!(update, csrf_header_name => next.csrf.header_name);
        apply_field!(update, allowed_tags => next.sanitization.allowed_tags);
        apply_field!(update, allowed_attributes => next.sanitization.allowed_attributes);
        apply_field!(update, max_input_length => next.sanitization.max_length);
        apply_field!(update, associated_data => next.encryption.associated_data);
        apply_field!(update, session_secure => next.session.secure);
        apply_field!(update, session_same_site => next.session.same_site);
        apply_field!(update, session_max_age_secs => next.session.max_age_secs);
        apply_field!(update, retention_hours => next.threat.retention_hours);
        apply_field!(update, cleanup_interval_secs => next.threat.cleanup_interval_secs);
        apply_field!(update, analysis_interval_secs => next.threat.analysis_interval_secs);
        apply_field!(update, suspicious_threshold => next.threat.suspicious_threshold);
        apply_field!(update, suspicious_idle_secs => next.threat.suspicious_idle_secs);
        apply_field!(update, max_events => next.threat.max_events);
        if let Some(key) = &update.encryption_key {
            next.encryption.key = Some(key.clone());
        }
        next.validate()?;
        Ok(next)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let jwt = &self.jwt;
        if jwt.access_token_ttl_secs == 0 {
            return invalid("jwt.access_token_ttl_secs must be > 0");
        }
        if jwt.refresh_token_ttl_secs < jwt.access_token_ttl_secs {
            return invalid("jwt.refresh_token_ttl_secs must be >= jwt.access_token_ttl_secs");
        }
        if jwt.issuer.trim().is_empty() || jwt.audience.trim().is_empty() {
            return invalid("jwt.issuer and jwt.audience must not be empty");
        }
        if jwt.access_secret.is_empty() || jwt.refresh_secret.is_empty() {
            return invalid("jwt secrets must not be empty");
        }
        if jwt.access_secret == jwt.refresh_secret {
            return invalid("jwt access and refresh secrets must differ");
        }

        if self.rate_limit.window_ms == 0 {
            return invalid("rate_limit.window_ms must be > 0");
        }
        if self.rate_limit.max_requests == 0 {
            return invalid("rate_limit.max_requests must be > 0");
        }

        if !(16..=128).contains(&self.csrf.token_length) {
            return invalid("csrf.token_length must be between 16 and 128 bytes");
        }
        if self.csrf.secret.is_empty() {
            return invalid("csrf.secret must not be empty");
        }
        if self.csrf.cookie_name.trim().is_empty() || self.csrf.header_name.trim().is_empty() {
            return invalid("csrf.cookie_name and csrf.header_name must not be empty");
        }

        if self.sanitization.max_length == 0 {
            return invalid("sanitization.max_length must be > 0");
        }

        let enc = &self.encryption;
        if !enc.algorithm.eq_ignore_ascii_case(SUPPORTED_ALGORITHM) {
            return Err(ConfigError::ValidationError(format!(
                "encryption.algorithm '{}' is not supported (only {SUPPORTED_ALGORITHM})",
                enc.algorithm
            )));
        }
        if enc.iv_length != 12 || enc.tag_length != 16 {
            return invalid("aes-256-gcm requires iv_length = 12 and tag_length = 16");
        }
        let key = enc.key_bytes()?;

        match self.session.same_site.to_ascii_lowercase().as_str() {
            "strict" | "lax" => {}
            "none" if self.session.secure => {}
            "none" => return invalid("session.same_site = none requires session.secure"),
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "session.same_site '{other}' must be strict, lax or none"
                )));
            }
        }

        let threat = &self.threat;
        if threat.retention_hours == 0
            || threat.cleanup_interval_secs == 0
            || threat.analysis_interval_secs == 0
        {
            return invalid("threat retention and schedule intervals must be > 0");
        }
        if threat.suspicious_threshold == 0 || threat.max_events == 0 {
            return invalid("threat.suspicious_threshold and threat.max_events must be > 0");
        }

        if self.is_production() {
            self.validate_production(key.as_deref())?;
        }

        Ok(())
    }

    /// Secret hygiene checks that only apply to the production profile.
    fn validate_production(&self, key: Option<&[u8]>) -> Result<(), ConfigError> {
        for (name, secret) in [
            ("jwt.access_secret", &self.jwt.access_secret),
            ("jwt.refresh_secret", &self.jwt.refresh_secret),
            ("csrf.secret", &self.csrf.secret),
        ] {
            if is_placeholder(secret) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} uses a development placeholder in production"
                )));
            }
            if secret.len() < MIN_PRODUCTION_SECRET_LEN {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be at least {MIN_PRODUCTION_SECRET_LEN} bytes in production"
                )));
            }
        }
        let Some(key) = key else {
            return invalid("encryption.key is required in production");
        };
        if key == self.jwt.access_secret.as_bytes() || key == self.jwt.refresh_secret.as_bytes() {
            return invalid("encryption.key must not reuse a signing secret");
        }
        if !self.session.secure {
            return invalid("session.secure must be enabled in production");
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.into()))
}

fn is_placeholder(secret: &str) -> bool {
    secret.trim().is_empty()
        || [DEV_ACCESS_SECRET, DEV_REFRESH_SECRET, DEV_CSRF_SECRET].contains(&secret)
        || secret.contains("change-me")
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn production_config() -> SecurityConfig {
        let mut config = SecurityConfig {
            profile: Profile::Production,
            ..SecurityConfig::default()
        };
        config.jwt.access_secret = "a".repeat(48);
        config.jwt.refresh_secret = "r".repeat(48);
        config.csrf.secret = "c".repeat(48);
        config.encryption.key = Some(BASE64.encode([7u8; 32]));
        config
    }

    #[test]
    fn default_config_is_valid() {
        let config = SecurityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.profile, Profile::Development);
        assert_eq!(config.jwt.access_token_ttl_secs, 900);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.threat.suspicious_threshold, 10);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = SecurityConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SecurityConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.jwt.issuer, config.jwt.issuer);
        assert_eq!(parsed.rate_limit.window_ms, config.rate_limit.window_ms);
    }

    #[test]
    fn production_rejects_placeholder_secrets() {
        let config = SecurityConfig {
            profile: Profile::Production,
            ..SecurityConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("placeholder"));
    }

    #[test]
    fn production_accepts_strong_secrets() {
        assert!(production_config().validate().is_ok());
    }

    #[test]
    fn production_requires_distinct_secrets_and_key() {
        let mut config = production_config();
        config.jwt.refresh_secret = config.jwt.access_secret.clone();
        assert!(config.validate().is_err());

        let mut config = production_config();
        config.encryption.key = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("encryption.key"));
    }

    #[test]
    fn equal_jwt_secrets_rejected_in_every_profile() {
        let mut config = SecurityConfig::default();
        config.jwt.refresh_secret = config.jwt.access_secret.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn update_sets_threat_schedule_fields() {
        let update = SecurityConfigUpdate {
            cleanup_interval_secs: Some(600),
            analysis_interval_secs: Some(60),
            suspicious_idle_secs: Some(120),
            ..SecurityConfigUpdate::default()
        };
        let next = SecurityConfig::default().merged(&update).unwrap();
        assert_eq!(next.threat.cleanup_interval_secs, 600);
        assert_eq!(next.threat.analysis_interval_secs, 60);
        assert_eq!(next.threat.suspicious_idle_secs, 120);

        let zero = SecurityConfigUpdate {
            analysis_interval_secs: Some(0),
            ..SecurityConfigUpdate::default()
        };
        assert!(SecurityConfig::default().merged(&zero).is_err());
    }

    #[test]
    fn short_production_secret_rejected() {
        let mut config = production_config();
        config.csrf.secret = "short-but-not-placeholder".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_encryption_key_rejected() {
        let mut config = SecurityConfig::default();
        config.encryption.key = Some(BASE64.encode([1u8; 16]));
        assert!(config.validate().is_err());

        config.encryption.key = Some("not base64 !!".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_algorithm_rejected() {
        let mut config = SecurityConfig::default();
        config.encryption.algorithm = "aes-128-cbc".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn same_site_none_requires_secure() {
        let mut config = SecurityConfig::default();
        config.session.same_site = "none".into();
        config.session.secure = false;
        assert!(config.validate().is_err());
        config.session.secure = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn merged_applies_and_validates() {
        let config = SecurityConfig::default();
        let update = SecurityConfigUpdate {
            rate_limit_max_requests: Some(3),
            issuer: Some("tenant-a".into()),
            ..Default::default()
        };
        let next = config.merged(&update).unwrap();
        assert_eq!(next.rate_limit.max_requests, 3);
        assert_eq!(next.jwt.issuer, "tenant-a");
        assert_eq!(next.jwt.audience, config.jwt.audience);
        // Original untouched
        assert_eq!(config.rate_limit.max_requests, 100);
    }

    #[test]
    fn merged_rejects_invalid_field() {
        let config = SecurityConfig::default();
        let update = SecurityConfigUpdate {
            rate_limit_max_requests: Some(0),
            ..Default::default()
        };
        assert!(config.merged(&update).is_err());
    }

    #[test]
    fn update_rejects_unknown_fields() {
        let result: Result<SecurityConfigUpdate, _> =
            serde_json::from_str(r#"{"rate_limit_max": 5}"#);
        assert!(result.is_err());

        let update: SecurityConfigUpdate =
            serde_json::from_str(r#"{"rate_limit_max_requests": 5}"#).unwrap();
        assert_eq!(update.rate_limit_max_requests, Some(5));
    }

    #[test]
    fn overrides_read_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LEDGERGUARD_PROFILE", "prod"),
            ("LEDGERGUARD_RATE_LIMIT_MAX", "42"),
            ("LEDGERGUARD_JWT_ACCESS_SECRET", "env-access"),
        ]);
        let mut config = SecurityConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.profile, Profile::Production);
        assert_eq!(config.rate_limit.max_requests, 42);
        assert_eq!(config.jwt.access_secret, "env-access");
    }

    #[test]
    fn bad_numeric_override_rejected() {
        let mut config = SecurityConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "LEDGERGUARD_RATE_LIMIT_WINDOW_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = SecurityConfig::read_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.jwt.issuer, "ledgerguard");
    }

    #[test]
    fn config_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[jwt]
issuer = "erp"
access_token_ttl_secs = 60

[rate_limit]
max_requests = 3

[sanitization]
allowed_tags = ["b"]
"#
        )
        .unwrap();

        let config = SecurityConfig::read_from(file.path()).unwrap();
        assert_eq!(config.jwt.issuer, "erp");
        assert_eq!(config.jwt.access_token_ttl_secs, 60);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.sanitization.allowed_tags, vec!["b".to_string()]);
        assert_eq!(config.csrf.token_length, 32);
    }

    #[test]
    fn malformed_config_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[jwt\nissuer = ").unwrap();
        let err = SecurityConfig::read_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn cookie_attributes_render_policy() {
        let session = SessionConfig::default();
        assert_eq!(
            session.cookie_attributes(),
            "Path=/; Max-Age=86400; HttpOnly; Secure; SameSite=Strict"
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = production_config();
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&config.jwt.access_secret));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = SecurityConfig::default_toml();
        assert!(toml_str.contains("ledgerguard-api"));
        assert!(toml_str.contains("aes-256-gcm"));
    }
}
