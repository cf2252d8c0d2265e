use std::time::Duration;

use pr_device::{DiscoveryService, UdpDiscovery};
use pr_domain::config::Config;

/// One-shot discovery from the command line.
pub async fn run(config: &Config, timeout_ms: Option<u64>, json: bool) -> anyhow::Result<()> {
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.printer.discovery_timeout());
    let discovery = UdpDiscovery::new(config.printer.discovery_port);
    let devices = discovery
        .discover(timeout)
        .await
        .map_err(|e| anyhow::anyhow!("discovery failed: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No printers answered within {}ms", timeout.as_millis());
        return Ok(());
    }
    for device in &devices {
        let proxy = if device.is_proxy { "  (proxy)" } else { "" };
        println!("{:<16} {}{proxy}", device.address, device.name);
    }
    Ok(())
}
