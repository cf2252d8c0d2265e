use std::sync::Arc;

use pr_domain::config::Config;

use crate::broadcast::{StatusPublisher, StatusSubscribers};
use crate::media::{MediaRelay, RestartSignal, ViewerRegistry};
use crate::status::StatusHandle;
use crate::supervisor::ConnectivitySupervisor;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config and the status actor handle
/// - **Fan-out** — status subscribers, camera viewers, the publisher
/// - **Device side** — connectivity supervisor and camera relay
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub status: StatusHandle,

    // ── Fan-out ───────────────────────────────────────────────────────
    pub subscribers: Arc<StatusSubscribers>,
    pub viewers: Arc<ViewerRegistry>,
    pub publisher: Arc<StatusPublisher>,

    // ── Device side ───────────────────────────────────────────────────
    pub supervisor: Arc<ConnectivitySupervisor>,
    pub relay: Arc<MediaRelay>,
    /// Raised by the relay when the process must be restarted.
    pub restart: RestartSignal,
}
