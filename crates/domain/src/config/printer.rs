use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Printer connectivity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the gateway finds, connects to and supervises the printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Fixed printer address.  When `None`, the gateway discovers
    /// candidates on the LAN and fails over between them.
    #[serde(default)]
    pub address: Option<String>,
    /// Port of the device's WebSocket endpoint.
    #[serde(default = "d_ws_port")]
    pub websocket_port: u16,
    /// UDP port discovery probes are broadcast to.
    #[serde(default = "d_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "d_10000")]
    pub connect_timeout_ms: u64,
    #[serde(default = "d_10000")]
    pub command_timeout_ms: u64,
    #[serde(default = "d_2000")]
    pub status_poll_interval_ms: u64,
    #[serde(default = "d_5000")]
    pub discovery_timeout_ms: u64,
    /// Consecutive failures tolerated on one candidate before failing over.
    #[serde(default = "d_3")]
    pub retries_per_candidate: u32,
    /// Delay between connection attempts during auto-connect.
    #[serde(default = "d_5000")]
    pub retry_delay_ms: u64,
    /// Delay before rediscovering after the candidate list is exhausted
    /// or discovery came back empty.
    #[serde(default = "d_10000")]
    pub rediscovery_delay_ms: u64,
    /// How long a dropped device gets to reconnect on its own before
    /// auto-connect gives up on it and fails over.
    #[serde(default = "d_30000")]
    pub reconnect_grace_ms: u64,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            address: None,
            websocket_port: d_ws_port(),
            discovery_port: d_discovery_port(),
            connect_timeout_ms: 10_000,
            command_timeout_ms: 10_000,
            status_poll_interval_ms: 2_000,
            discovery_timeout_ms: 5_000,
            retries_per_candidate: 3,
            retry_delay_ms: 5_000,
            rediscovery_delay_ms: 10_000,
            reconnect_grace_ms: 30_000,
        }
    }
}

impl PrinterConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

fn d_ws_port() -> u16 {
    3030
}
fn d_discovery_port() -> u16 {
    3000
}
fn d_2000() -> u64 {
    2_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_10000() -> u64 {
    10_000
}
fn d_30000() -> u64 {
    30_000
}
fn d_3() -> u32 {
    3
}
