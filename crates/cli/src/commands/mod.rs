pub mod crypto;
pub mod csrf;
pub mod doctor;
pub mod init;
pub mod run;
pub mod sanitize;
pub mod status;
pub mod token;

use ledgerguard_security::SecurityManager;

/// Build a manager from the on-disk config plus environment overrides.
pub fn load_manager() -> Result<SecurityManager, Box<dyn std::error::Error>> {
    SecurityManager::from_env().map_err(|e| format!("Failed to start security manager: {e}").into())
}
