//! Collaborator seams between the gateway and the printer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pr_protocol::PrinterStatus;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::DeviceError;

/// Lifecycle and data events emitted by a [`DeviceClient`].
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Unsolicited (or polled) status push.
    Status(PrinterStatus),
    /// The socket dropped.  The client keeps trying to reconnect on its own.
    Disconnected { reason: String },
    /// A non-fatal error, e.g. a failed reconnect attempt.
    Error(String),
    /// The socket came back after a [`DeviceEvent::Disconnected`].
    Reconnected,
}

/// What the printer told us about itself while connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub mainboard_id: Option<String>,
}

/// A printer found on the LAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
    pub is_proxy: bool,
}

/// One connection to one printer.
///
/// Implementations own their socket and reconnect it on their own after a
/// drop, reporting progress through [`subscribe`](Self::subscribe).
#[async_trait]
pub trait DeviceClient: Send + Sync {
    fn address(&self) -> &str;

    /// Open the socket, bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<DeviceIdentity, DeviceError>;

    /// Close the socket and stop every background task.  Idempotent.
    async fn disconnect(&self);

    /// Send `cmd` and wait for the matching response payload.
    async fn send_command(
        &self,
        cmd: u32,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, DeviceError>;

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Request a status push every `interval` until disconnected.
    fn start_status_polling(&self, interval: Duration);

    fn is_connected(&self) -> bool;
}

/// Builds clients for addresses.
pub trait DeviceConnector: Send + Sync {
    fn create(&self, address: &str) -> Arc<dyn DeviceClient>;
}

#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, DeviceError>;
}
