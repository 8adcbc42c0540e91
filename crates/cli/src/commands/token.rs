//! `ledgerguard token` — Issue or verify bearer tokens.

use ledgerguard_security::TokenType;
use serde_json::{Map, Value};

pub async fn issue(claims: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let claims = parse_claims(&claims)?;
    let manager = super::load_manager()?;
    let pair = manager.issue_tokens(&claims);
    println!("{}", serde_json::to_string_pretty(&pair)?);
    Ok(())
}

pub async fn verify(token: String, token_type: String) -> Result<(), Box<dyn std::error::Error>> {
    let expected: TokenType = token_type.parse()?;
    let manager = super::load_manager()?;
    match manager.verify_token(&token, expected) {
        Ok(claims) => {
            println!("  ✅ Valid {expected} token");
            println!("{}", serde_json::to_string_pretty(&claims.to_map())?);
            Ok(())
        }
        Err(e) => {
            println!("  ❌ {e}");
            Err(format!("token rejected ({})", e.code()).into())
        }
    }
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type;
/// anything else becomes a string.
fn parse_claims(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut claims = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("claim '{pair}' must be key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("claim '{pair}' has an empty key"));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        claims.insert(key.to_string(), value);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_keep_json_types() {
        let claims = parse_claims(&[
            "userId=u-1".into(),
            "admin=true".into(),
            "level=3".into(),
            "roles=[\"a\",\"b\"]".into(),
        ])
        .unwrap();
        assert_eq!(claims["userId"], json!("u-1"));
        assert_eq!(claims["admin"], json!(true));
        assert_eq!(claims["level"], json!(3));
        assert_eq!(claims["roles"], json!(["a", "b"]));
    }

    #[test]
    fn value_may_contain_equals() {
        let claims = parse_claims(&["note=a=b".into()]).unwrap();
        assert_eq!(claims["note"], json!("a=b"));
    }

    #[test]
    fn malformed_pairs_rejected() {
        assert!(parse_claims(&["novalue".into()]).is_err());
        assert!(parse_claims(&["=x".into()]).is_err());
    }
}
