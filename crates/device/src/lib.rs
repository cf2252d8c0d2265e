//! `pr-device` — talking to the printer.
//!
//! [`DeviceClient`], [`DeviceConnector`] and [`DiscoveryService`] are the
//! seams the gateway depends on.  [`SdcpClient`] and [`UdpDiscovery`] are
//! the production implementations.

pub mod discovery;
pub mod error;
pub mod reconnect;
pub mod sdcp;
pub mod traits;

pub use discovery::UdpDiscovery;
pub use error::DeviceError;
pub use reconnect::ReconnectBackoff;
pub use sdcp::{SdcpClient, SdcpConnector, SdcpSettings};
pub use traits::{
    DeviceClient, DeviceConnector, DeviceEvent, DeviceIdentity, DiscoveredDevice,
    DiscoveryService,
};
