//! `ledgerguard sanitize` — Run the input sanitizer on a string.

pub async fn run(input: String) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::load_manager()?;
    let output = manager.sanitize_input(&input);

    println!("{output}");

    let events = manager.get_events(10);
    if events.is_empty() {
        println!("\n  ✅ Nothing detected");
    } else {
        println!();
        for event in events.iter().rev() {
            println!("  ⚠️  [{}] {} — {}", event.severity, event.event_type, event.details);
        }
    }
    Ok(())
}
