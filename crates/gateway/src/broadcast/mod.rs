//! Fan-out of status messages and camera frames to attached subscribers.

pub mod gate;
pub mod publisher;
pub mod registry;

pub use gate::BroadcastGate;
pub use publisher::{ServerMessage, StatusPublisher, UserCounts};
pub use registry::{FanOut, SubscriberRegistry, Subscription};

/// Serialized status message shared by every subscriber.
pub type StatusMessage = std::sync::Arc<str>;

/// Registry of status push channels.
pub type StatusSubscribers = SubscriberRegistry<StatusMessage>;
