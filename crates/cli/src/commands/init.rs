//! `ledgerguard init` — Write a default config file.

use ledgerguard_config::SecurityConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = SecurityConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() && !force {
        println!("  ⚠️  {} already exists (use --force to overwrite)", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, SecurityConfig::default_toml())?;

    println!("  ✅ Wrote {}", config_path.display());
    println!("     Development secrets are placeholders. Before switching to the");
    println!("     production profile, set:");
    println!("       LEDGERGUARD_JWT_ACCESS_SECRET");
    println!("       LEDGERGUARD_JWT_REFRESH_SECRET");
    println!("       LEDGERGUARD_CSRF_SECRET");
    println!("       LEDGERGUARD_ENCRYPTION_KEY (base64, 32 bytes)");
    Ok(())
}
