//! Authenticated symmetric encryption (AES-256-GCM).
//!
//! Every call to [`CipherBox::encrypt`] draws a fresh 96-bit nonce from the
//! OS-seeded CSPRNG. The configured associated data is bound into each
//! ciphertext, so a payload sealed for one application context does not
//! open in another.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ledgerguard_config::EncryptionConfig;
use ledgerguard_core::CipherError;
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// A sealed payload. The tag is kept apart from the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Wraps an AES-256-GCM key and the application's associated data.
pub struct CipherBox {
    cipher: Aes256Gcm,
    associated_data: Vec<u8>,
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBox")
            .field("algorithm", &"aes-256-gcm")
            .field("associated_data", &String::from_utf8_lossy(&self.associated_data))
            .finish_non_exhaustive()
    }
}

impl CipherBox {
    /// Create a cipher from raw key bytes (must be 32 bytes).
    pub fn from_key(key: &[u8], associated_data: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher,
            associated_data: associated_data.to_vec(),
        })
    }

    /// Create a cipher from configuration.
    ///
    /// Without a configured key an ephemeral random key is generated, so
    /// anything sealed does not survive a restart. Production configs are
    /// rejected at validation time before reaching this point.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, CipherError> {
        let key = config
            .key_bytes()
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        match key {
            Some(key) => Self::from_key(&key, config.associated_data.as_bytes()),
            None => {
                tracing::warn!("No encryption key configured, using an ephemeral key");
                let mut key = [0u8; KEY_LEN];
                rand::rng().fill_bytes(&mut key);
                Self::from_key(&key, config.associated_data.as_bytes())
            }
        }
    }

    /// Encrypt `plaintext` under a fresh nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CipherError> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: &self.associated_data,
                },
            )
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(EncryptedPayload {
            ciphertext: sealed,
            iv: iv.to_vec(),
            tag,
        })
    }

    /// Decrypt and authenticate. Any tampering or malformed input fails.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> Result<Vec<u8>, CipherError> {
        if iv.len() != IV_LEN {
            return Err(CipherError::DecryptionFailed(format!(
                "iv must be {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(CipherError::DecryptionFailed(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: &sealed,
                    aad: &self.associated_data,
                },
            )
            .map_err(|_| CipherError::DecryptionFailed("authentication failed".into()))
    }

    /// Convenience form of [`CipherBox::decrypt`].
    pub fn open(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, CipherError> {
        self.decrypt(&payload.ciphertext, &payload.iv, &payload.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CipherBox {
        CipherBox::from_key(&[42u8; KEY_LEN], b"ledgerguard:test").unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let c = cipher();
        let plaintext = b"iban=DE89370400440532013000";
        let sealed = c.encrypt(plaintext).unwrap();
        assert_ne!(sealed.ciphertext, plaintext);
        assert_eq!(sealed.iv.len(), IV_LEN);
        assert_eq!(sealed.tag.len(), TAG_LEN);
        assert_eq!(c.open(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn roundtrip_across_lengths() {
        let c = cipher();
        for len in [0usize, 1, 15, 16, 17, 1000, 10_000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let sealed = c.encrypt(&plaintext).unwrap();
            assert_eq!(sealed.ciphertext.len(), len);
            assert_eq!(c.decrypt(&sealed.ciphertext, &sealed.iv, &sealed.tag).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let c = cipher();
        let a = c.encrypt(b"same").unwrap();
        let b = c.encrypt(b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn flipped_tag_byte_fails() {
        let c = cipher();
        let sealed = c.encrypt(b"payload").unwrap();
        for i in 0..TAG_LEN {
            let mut tag = sealed.tag.clone();
            tag[i] ^= 0x01;
            assert!(matches!(
                c.decrypt(&sealed.ciphertext, &sealed.iv, &tag),
                Err(CipherError::DecryptionFailed(_))
            ));
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let c = cipher();
        let mut sealed = c.encrypt(b"payload").unwrap();
        sealed.ciphertext[0] ^= 0x80;
        assert!(c.open(&sealed).is_err());
    }

    #[test]
    fn different_associated_data_fails() {
        let sealed = cipher().encrypt(b"payload").unwrap();
        let other = CipherBox::from_key(&[42u8; KEY_LEN], b"another-context").unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn malformed_inputs_fail() {
        let c = cipher();
        let sealed = c.encrypt(b"payload").unwrap();
        assert!(c.decrypt(&sealed.ciphertext, &sealed.iv[..8], &sealed.tag).is_err());
        assert!(c.decrypt(&sealed.ciphertext, &sealed.iv, &sealed.tag[..4]).is_err());
    }

    #[test]
    fn wrong_key_length_rejected() {
        assert!(matches!(
            CipherBox::from_key(&[0u8; 16], b""),
            Err(CipherError::InvalidKey(_))
        ));
    }

    #[test]
    fn from_config_without_key_is_ephemeral() {
        let config = EncryptionConfig::default();
        let a = CipherBox::from_config(&config).unwrap();
        let b = CipherBox::from_config(&config).unwrap();
        let sealed = a.encrypt(b"x").unwrap();
        assert!(a.open(&sealed).is_ok());
        assert!(b.open(&sealed).is_err());
    }
}
