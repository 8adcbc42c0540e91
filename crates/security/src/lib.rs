//! Security layer for LedgerGuard — tokens, rate limiting, CSRF,
//! sanitization, encryption and threat tracking.
//!
//! Provides:
//! - **Tokens**: HMAC-SHA256 signed access/refresh pairs
//! - **Rate limiting**: Fixed-window counters keyed by caller identity
//! - **CSRF**: Random and session-bound anti-forgery tokens
//! - **Sanitization**: Markup stripping and injection detection
//! - **Encryption**: AES-256-GCM with associated data
//! - **Threat ledger**: Security events, statistics and the blocked-IP set
//!
//! [`SecurityManager`] owns all of it; callers go through its methods.

pub mod cipher;
pub mod csrf;
pub mod ledger;
pub mod manager;
pub mod rate_limit;
pub mod sanitize;
pub mod schedule;
pub mod token;

pub use cipher::{CipherBox, EncryptedPayload};
pub use csrf::{CsrfFailure, CsrfGuard};
pub use ledger::{BlockedIp, SecurityStats, ThreatLedger, ThreatPolicy};
pub use manager::SecurityManager;
pub use rate_limit::{RateLimitDecision, RateLimitOutcome, RateLimitState, RateLimiter};
pub use sanitize::{SanitizeReport, Sanitizer};
pub use schedule::Schedules;
pub use token::{TokenClaims, TokenPair, TokenService, TokenType};
