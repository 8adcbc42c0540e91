//! `ledgerguard doctor` — Diagnose configuration problems.

use ledgerguard_config::{Profile, SecurityConfig};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 LedgerGuard Doctor — Configuration Diagnostics");
    println!("================================================\n");

    let mut issues = 0;

    let config_path = std::env::var("LEDGERGUARD_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| SecurityConfig::config_dir().join("config.toml"));
    if config_path.exists() {
        println!("  ✅ Config file found: {}", config_path.display());
    } else {
        println!("  ⚠️  No config file — using defaults (run `ledgerguard init`)");
    }

    let config = match SecurityConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid for the {} profile", config.profile);
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the error above; the security manager will refuse to start.");
            return Ok(());
        }
    };

    if config.profile == Profile::Development {
        // The same checks production startup would apply
        let production = SecurityConfig {
            profile: Profile::Production,
            ..config.clone()
        };
        match production.validate() {
            Ok(()) => println!("  ✅ Ready for the production profile"),
            Err(e) => {
                println!("  ⚠️  Not ready for production: {e}");
                issues += 1;
            }
        }
    }

    if config.encryption.key.is_none() {
        println!("  ⚠️  No encryption key — ciphertexts will not survive a restart");
        issues += 1;
    }

    if !config.session.secure {
        println!("  ⚠️  Session cookie is not marked Secure");
        issues += 1;
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
