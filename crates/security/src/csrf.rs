//! Anti-forgery tokens.
//!
//! Plain tokens are random hex strings compared against the copy stored in
//! the session. Session-bound tokens additionally carry an HMAC over the
//! session id, so a token minted for one session is useless in another.

use hmac::{Hmac, Mac};
use ledgerguard_config::CsrfConfig;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Why a CSRF check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// One of the two tokens was absent or empty
    Missing,
    /// Both present, but they differ
    Mismatch,
}

impl CsrfFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing_token",
            Self::Mismatch => "token_mismatch",
        }
    }
}

/// Generates and verifies anti-forgery tokens.
pub struct CsrfGuard {
    secret: Vec<u8>,
    token_length: usize,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("token_length", &self.token_length)
            .finish_non_exhaustive()
    }
}

impl CsrfGuard {
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            token_length: config.token_length,
        }
    }

    /// A fresh random token: `token_length` CSPRNG bytes, hex-encoded.
    pub fn generate(&self) -> String {
        let mut bytes = vec![0u8; self.token_length];
        rand::rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Compare a submitted token with the session's copy in constant time.
    pub fn check(&self, token: Option<&str>, session_token: Option<&str>) -> Result<(), CsrfFailure> {
        let (Some(token), Some(session_token)) = (token, session_token) else {
            return Err(CsrfFailure::Missing);
        };
        if token.is_empty() || session_token.is_empty() {
            return Err(CsrfFailure::Missing);
        }
        if bool::from(token.as_bytes().ct_eq(session_token.as_bytes())) {
            Ok(())
        } else {
            Err(CsrfFailure::Mismatch)
        }
    }

    /// Boolean form of [`CsrfGuard::check`].
    pub fn verify(&self, token: &str, session_token: &str) -> bool {
        self.check(Some(token), Some(session_token)).is_ok()
    }

    /// A token bound to `session_id`: `nonce "." hex(HMAC(secret, session_id "." nonce))`.
    pub fn generate_for_session(&self, session_id: &str) -> String {
        let nonce = self.generate();
        let tag = self.session_tag(session_id, &nonce);
        format!("{nonce}.{tag}")
    }

    /// Check a session-bound token against the session it claims to belong to.
    pub fn check_for_session(&self, token: &str, session_id: &str) -> Result<(), CsrfFailure> {
        if token.is_empty() || session_id.is_empty() {
            return Err(CsrfFailure::Missing);
        }
        let Some((nonce, tag)) = token.split_once('.') else {
            return Err(CsrfFailure::Mismatch);
        };
        let expected = self.session_tag(session_id, nonce);
        if bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
            Ok(())
        } else {
            Err(CsrfFailure::Mismatch)
        }
    }

    fn session_tag(&self, session_id: &str, nonce: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(session_id.as_bytes());
        mac.update(b".");
        mac.update(nonce.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
