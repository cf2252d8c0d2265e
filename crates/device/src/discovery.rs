//! LAN discovery: broadcast the probe over UDP and collect replies until
//! the timeout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use pr_protocol::{DiscoveryReply, DISCOVERY_PROBE};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::error::DeviceError;
use crate::traits::{DiscoveredDevice, DiscoveryService};

#[derive(Debug, Clone)]
pub struct UdpDiscovery {
    target: IpAddr,
    port: u16,
}

impl UdpDiscovery {
    /// Probe the limited broadcast address on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            target: IpAddr::V4(Ipv4Addr::BROADCAST),
            port,
        }
    }

    /// Probe a single host instead of broadcasting.
    pub fn unicast(target: IpAddr, port: u16) -> Self {
        Self { target, port }
    }
}

#[async_trait]
impl DiscoveryService for UdpDiscovery {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, DeviceError> {
        let bind: SocketAddr = match self.target {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(DISCOVERY_PROBE.as_bytes(), (self.target, self.port))
            .await?;
        tracing::debug!(target = %self.target, port = self.port, "discovery probe sent");

        let deadline = Instant::now() + timeout;
        let mut found: Vec<DiscoveredDevice> = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "discovery receive failed");
                    continue;
                }
            };
            let Some(device) = parse_reply(&buf[..len], from.ip()) else {
                tracing::trace!(from = %from, "ignoring non-discovery datagram");
                continue;
            };
            if !found.iter().any(|d| d.address == device.address) {
                tracing::info!(address = %device.address, name = %device.name, proxy = device.is_proxy, "printer discovered");
                found.push(device);
            }
        }
        Ok(found)
    }
}

/// Decode one reply.  The advertised `MainboardIP` wins over the sender
/// address; the name falls back to the address.
pub fn parse_reply(bytes: &[u8], from: IpAddr) -> Option<DiscoveredDevice> {
    let reply: DiscoveryReply = serde_json::from_slice(bytes).ok()?;
    let address = reply
        .data
        .mainboard_ip
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map_or_else(|| from.to_string(), str::to_owned);
    let name = reply
        .data
        .display_name()
        .map_or_else(|| address.clone(), str::to_owned);
    Some(DiscoveredDevice {
        address,
        name,
        is_proxy: reply.data.proxy.unwrap_or(false),
    })
}
