//! `ledgerguard status` — Show the effective configuration.

use ledgerguard_config::SecurityConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = SecurityConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🛡️  LedgerGuard Status");
    println!("=====================");
    println!("  Config dir:     {}", SecurityConfig::config_dir().display());
    println!("  Profile:        {}", config.profile);
    println!(
        "  Tokens:         access {}s, refresh {}s ({} → {})",
        config.jwt.access_token_ttl_secs,
        config.jwt.refresh_token_ttl_secs,
        config.jwt.issuer,
        config.jwt.audience
    );
    println!(
        "  Rate limit:     {} requests / {}ms",
        config.rate_limit.max_requests, config.rate_limit.window_ms
    );
    println!(
        "  CSRF:           {} bytes, cookie {}, header {}",
        config.csrf.token_length, config.csrf.cookie_name, config.csrf.header_name
    );
    println!("  Max input:      {} chars", config.sanitization.max_length);
    println!(
        "  Encryption:     {} ({})",
        config.encryption.algorithm,
        if config.encryption.key.is_some() { "key configured" } else { "ephemeral key" }
    );
    println!(
        "  Session cookie: {}; {}",
        config.session.cookie_name,
        config.session.cookie_attributes()
    );
    println!(
        "  Threats:        retain {}h, block after {} suspicious events",
        config.threat.retention_hours, config.threat.suspicious_threshold
    );

    Ok(())
}
