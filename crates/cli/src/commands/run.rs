//! `ledgerguard run` — Start the security manager and its background schedules.

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::load_manager()?;
    let config = manager.get_config();

    println!("🛡️  LedgerGuard — Starting security manager");
    println!("   Profile:  {}", config.profile);
    println!(
        "   Cleanup:  every {}s (retain {}h)",
        config.threat.cleanup_interval_secs, config.threat.retention_hours
    );
    println!("   Analysis: every {}s", config.threat.analysis_interval_secs);
    println!("   Press Ctrl-C to stop.\n");

    let mut events = manager.subscribe();
    manager.start();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => info!(
                    id = %event.id,
                    event_type = %event.event_type,
                    ip = %event.source.ip,
                    "Security event"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event subscriber lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.shutdown().await;
    let stats = manager.get_stats();
    println!(
        "\n   Stopped. {} events recorded, {} IPs blocked.",
        stats.total_events, stats.blocked_ips
    );
    Ok(())
}
