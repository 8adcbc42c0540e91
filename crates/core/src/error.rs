//! Error types for the LedgerGuard domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all LedgerGuard operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Token errors ---
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    // --- Cipher errors ---
    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures on the bearer-token verification path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },

    #[error("Token type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),
}

impl TokenError {
    /// Short machine-readable code, used as the `reason` of the security
    /// event recorded for a failed verification.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid_format",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired { .. } => "token_expired",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidClaims(_) => "invalid_claims",
        }
    }
}

/// Failures of the authenticated symmetric cipher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}
