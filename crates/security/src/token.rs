//! Bearer tokens — HMAC-SHA256 signed claim bundles in compact JWT form.
//!
//! A token is `base64url(header) "." base64url(payload) "." base64url(signature)`
//! where the signature is `HMAC-SHA256(secret, header "." payload)`.
//! Access and refresh tokens are signed with independent secrets, so a
//! leaked access secret cannot mint refresh tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use ledgerguard_config::JwtConfig;
use ledgerguard_core::TokenError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Claim names stamped by the service. Caller claims with these names are dropped.
pub const RESERVED_CLAIMS: [&str; 5] = ["iat", "exp", "iss", "aud", "type"];

const ALGORITHM: &str = "HS256";
const TOKEN_TYP: &str = "JWT";

/// Which secret a token is signed with and what it may be used for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            other => Err(TokenError::InvalidClaims(format!("unknown token type '{other}'"))),
        }
    }
}

/// A verified (or about to be signed) claim bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Caller-supplied claims (user id, org id, roles, ...)
    #[serde(flatten)]
    pub custom: Map<String, Value>,
    /// Issued-at, seconds since the Unix epoch
    pub iat: i64,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl TokenClaims {
    /// The full claim map: caller claims plus the stamped ones.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.custom.clone();
        map.insert("iat".into(), self.iat.into());
        map.insert("exp".into(), self.exp.into());
        map.insert("iss".into(), self.iss.clone().into());
        map.insert("aud".into(), self.aud.clone().into());
        map.insert("type".into(), self.token_type.as_str().into());
        map
    }
}

/// An access/refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Issues and verifies signed tokens.
pub struct TokenService {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_secret: config.access_secret.as_bytes().to_vec(),
            refresh_secret: config.refresh_secret.as_bytes().to_vec(),
            access_ttl_secs: i64::try_from(config.access_token_ttl_secs).unwrap_or(i64::MAX),
            refresh_ttl_secs: i64::try_from(config.refresh_token_ttl_secs).unwrap_or(i64::MAX),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Issue an access/refresh pair carrying `claims`.
    pub fn issue(&self, claims: &Map<String, Value>) -> TokenPair {
        self.issue_at(claims, Utc::now().timestamp())
    }

    /// Issue a pair as if the current time were `now` (Unix seconds).
    pub fn issue_at(&self, claims: &Map<String, Value>, now: i64) -> TokenPair {
        let mut custom = claims.clone();
        for name in RESERVED_CLAIMS {
            custom.remove(name);
        }

        let stamp = |token_type: TokenType, ttl: i64| TokenClaims {
            custom: custom.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            token_type,
        };

        TokenPair {
            access_token: self.sign(&stamp(TokenType::Access, self.access_ttl_secs)),
            refresh_token: self.sign(&stamp(TokenType::Refresh, self.refresh_ttl_secs)),
        }
    }

    /// Sign an arbitrary claim bundle with the secret matching its type.
    pub fn sign(&self, claims: &TokenClaims) -> String {
        let header = Header {
            alg: ALGORITHM.into(),
            typ: TOKEN_TYP.into(),
        };
        // Serializing these plain structs into a Vec cannot fail
        let header_json = serde_json::to_vec(&header).unwrap_or_default();
        let payload_json = serde_json::to_vec(claims).unwrap_or_default();

        let signing_input = format!("{}.{}", B64.encode(header_json), B64.encode(payload_json));
        let signature = self.mac(claims.token_type, signing_input.as_bytes()).finalize();
        format!("{signing_input}.{}", B64.encode(signature.into_bytes()))
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, expected, Utc::now().timestamp())
    }

    /// Verify a token as if the current time were `now` (Unix seconds).
    ///
    /// The signature is checked before anything in the token is decoded or
    /// trusted. Both secrets are tried, in constant time each; the type
    /// claim must then name a secret that verified.
    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenType,
        now: i64,
    ) -> Result<TokenClaims, TokenError> {
        let (signing_input, signature_b64) = token
            .rsplit_once('.')
            .ok_or_else(|| TokenError::InvalidFormat("expected three segments".into()))?;
        let (header_b64, payload_b64) = signing_input
            .split_once('.')
            .ok_or_else(|| TokenError::InvalidFormat("expected three segments".into()))?;

        let signature = B64
            .decode(signature_b64)
            .map_err(|_| TokenError::InvalidSignature)?;

        let signed_as_access = self
            .mac(TokenType::Access, signing_input.as_bytes())
            .verify_slice(&signature)
            .is_ok();
        let signed_as_refresh = self
            .mac(TokenType::Refresh, signing_input.as_bytes())
            .verify_slice(&signature)
            .is_ok();
        if !signed_as_access && !signed_as_refresh {
            return Err(TokenError::InvalidSignature);
        }

        let header: Header = decode_segment(header_b64, "header")?;
        if header.alg != ALGORITHM || header.typ != TOKEN_TYP {
            return Err(TokenError::InvalidFormat(format!(
                "unsupported header alg '{}' typ '{}'",
                header.alg, header.typ
            )));
        }

        // The type claim must name the secret that actually signed the token
        let claims: TokenClaims = decode_segment(payload_b64, "payload")?;
        let signed_by_claimed_kind = match claims.token_type {
            TokenType::Access => signed_as_access,
            TokenType::Refresh => signed_as_refresh,
        };
        if !signed_by_claimed_kind {
            return Err(TokenError::InvalidClaims(
                "type claim does not match signing key".into(),
            ));
        }
        if claims.exp <= claims.iat {
            return Err(TokenError::InvalidClaims("exp must be after iat".into()));
        }
        if now >= claims.exp {
            return Err(TokenError::TokenExpired {
                expired_at: claims.exp,
            });
        }
        if claims.token_type != expected {
            return Err(TokenError::TypeMismatch {
                expected: expected.to_string(),
                found: claims.token_type.to_string(),
            });
        }
        if claims.iss != self.issuer {
            return Err(TokenError::InvalidClaims(format!(
                "unexpected issuer '{}'",
                claims.iss
            )));
        }
        if claims.aud != self.audience {
            return Err(TokenError::InvalidClaims(format!(
                "unexpected audience '{}'",
                claims.aud
            )));
        }

        Ok(claims)
    }

    fn mac(&self, token_type: TokenType, data: &[u8]) -> HmacSha256 {
        let secret = match token_type {
            TokenType::Access => &self.access_secret,
            TokenType::Refresh => &self.refresh_secret,
        };
        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(data);
        mac
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    name: &str,
) -> Result<T, TokenError> {
    let bytes = B64
        .decode(segment)
        .map_err(|e| TokenError::InvalidFormat(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::InvalidFormat(format!("{name} is not valid JSON: {e}")))
}
