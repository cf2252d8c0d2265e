//! Camera relay: multipart reframing, frame throttling, fan-out to viewers
//! and the failure policy around the upstream stream.

pub mod failure;
pub mod multipart;
pub mod relay;
pub mod throttle;

use std::sync::Arc;

use bytes::Bytes;

use crate::broadcast::SubscriberRegistry;

pub use failure::{CameraFailureTracker, FailureVerdict};
pub use multipart::{MultipartReframer, ReframeError};
pub use relay::{MediaRelay, RelayError, RelayState, RestartSignal};
pub use throttle::FrameThrottle;

/// One complete image.  Cloning shares the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    pub content_type: Arc<str>,
}

impl Frame {
    pub fn new(data: Bytes, content_type: Arc<str>) -> Self {
        Self { data, content_type }
    }
}

/// Camera viewers.  Replays the latest frame to late joiners.
pub type ViewerRegistry = SubscriberRegistry<Frame>;
