//! Builds the outbound status messages and hands them to the gate.

use std::sync::Arc;

use pr_domain::status::CanonicalStatus;
use serde::Serialize;

use crate::media::ViewerRegistry;
use crate::status::StatusHandle;

use super::{BroadcastGate, StatusMessage, StatusSubscribers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCounts {
    pub status_subscribers: usize,
    pub camera_viewers: usize,
}

/// Messages pushed to status subscribers.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Status {
        printer: &'a CanonicalStatus,
        users: UserCounts,
    },
    ServerRestarting {
        reason: &'a str,
    },
}

impl ServerMessage<'_> {
    /// Serialize once; every subscriber shares the result.
    pub fn encode(&self) -> Option<StatusMessage> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Arc::from(json)),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize server message");
                None
            }
        }
    }
}

pub struct StatusPublisher {
    status: StatusHandle,
    gate: BroadcastGate,
    subscribers: Arc<StatusSubscribers>,
    viewers: Arc<ViewerRegistry>,
}

impl StatusPublisher {
    pub fn new(
        status: StatusHandle,
        gate: BroadcastGate,
        subscribers: Arc<StatusSubscribers>,
        viewers: Arc<ViewerRegistry>,
    ) -> Self {
        Self {
            status,
            gate,
            subscribers,
            viewers,
        }
    }

    pub fn users(&self) -> UserCounts {
        UserCounts {
            status_subscribers: self.subscribers.len(),
            camera_viewers: self.viewers.len(),
        }
    }

    /// The current status message, for a subscriber that just attached.
    pub fn current_message(&self) -> Option<StatusMessage> {
        let printer = self.status.snapshot();
        ServerMessage::Status {
            printer: &printer,
            users: self.users(),
        }
        .encode()
    }

    /// Throttled broadcast of the current status.
    pub fn publish(&self) {
        if let Some(msg) = self.current_message() {
            self.gate.send(msg);
        }
    }

    /// Urgent notice ahead of a deliberate process restart.
    pub fn announce_restart(&self, reason: &str) {
        if let Some(msg) = (ServerMessage::ServerRestarting { reason }).encode() {
            let out = self.gate.send_urgent(msg);
            tracing::warn!(delivered = out.delivered, reason, "restart notice broadcast");
        }
    }
}
