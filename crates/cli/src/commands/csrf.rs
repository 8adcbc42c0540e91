//! `ledgerguard csrf` — Generate an anti-forgery token.

pub async fn run(session: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::load_manager()?;
    let config = manager.get_config();
    let token = match session.as_deref() {
        Some(session_id) => manager.generate_session_csrf_token(session_id),
        None => manager.generate_csrf_token(),
    };
    println!("{token}");
    println!();
    println!("  Cookie: {}", config.csrf.cookie_name);
    println!("  Header: {}", config.csrf.header_name);
    Ok(())
}
