//! `ledgerguard encrypt` / `ledgerguard decrypt` — AES-256-GCM with the configured key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde_json::json;

pub async fn encrypt(plaintext: String) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::load_manager()?;
    if manager.get_config().encryption.key.is_none() {
        eprintln!("  ⚠️  No encryption key configured; this output cannot be decrypted later");
    }

    let sealed = manager.encrypt(plaintext.as_bytes())?;
    let out = json!({
        "ciphertext": B64.encode(&sealed.ciphertext),
        "iv": B64.encode(&sealed.iv),
        "tag": B64.encode(&sealed.tag),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub async fn decrypt(ciphertext: String, iv: String, tag: String) -> Result<(), Box<dyn std::error::Error>> {
    let ciphertext = decode("ciphertext", &ciphertext)?;
    let iv = decode("iv", &iv)?;
    let tag = decode("tag", &tag)?;

    let manager = super::load_manager()?;
    let plaintext = manager.decrypt(&ciphertext, &iv, &tag)?;
    println!("{}", String::from_utf8_lossy(&plaintext));
    Ok(())
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, String> {
    B64.decode(value.trim())
        .map_err(|e| format!("{field} is not valid base64: {e}"))
}
