//! Connectivity supervision.
//!
//! ```text
//! Disconnected → Connecting → Connected ─┬─ explicit teardown → Disconnected
//!                                        └─ socket drop → Reconnecting → Connected
//! ```
//!
//! The device client re-opens its own socket after a drop; the supervisor
//! only resets the published status and, once the client reports
//! `Reconnected`, re-runs post-connect setup.  Setup is guarded so that
//! concurrent triggers collapse into one run.
//!
//! Without a configured address the supervisor runs auto-connect: discover,
//! try each candidate `retries_per_candidate` times, rediscover when the
//! list runs out.  Every explicit connect bumps a generation counter and
//! any older auto-connect loop stops at its next checkpoint.

pub mod candidates;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pr_device::{
    DeviceClient, DeviceConnector, DeviceError, DeviceEvent, DiscoveredDevice, DiscoveryService,
};
use pr_domain::config::PrinterConfig;
use pr_protocol::{CameraReply, CMD_CAMERA, CMD_STATUS};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broadcast::StatusPublisher;
use crate::media::MediaRelay;
use crate::status::StatusHandle;

pub use candidates::{CandidateList, FailoverStep};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("superseded by a newer connect request")]
    Superseded,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub poll_interval: Duration,
    pub discovery_timeout: Duration,
    pub retries_per_candidate: u32,
    pub retry_delay: Duration,
    pub rediscovery_delay: Duration,
    /// How long a dropped device may take to come back before auto mode
    /// fails over.
    pub reconnect_grace: Duration,
}

impl From<&PrinterConfig> for SupervisorSettings {
    fn from(cfg: &PrinterConfig) -> Self {
        Self {
            connect_timeout: cfg.connect_timeout(),
            command_timeout: cfg.command_timeout(),
            poll_interval: cfg.status_poll_interval(),
            discovery_timeout: cfg.discovery_timeout(),
            retries_per_candidate: cfg.retries_per_candidate,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            rediscovery_delay: Duration::from_millis(cfg.rediscovery_delay_ms),
            reconnect_grace: Duration::from_millis(cfg.reconnect_grace_ms),
        }
    }
}

struct ActiveClient {
    id: u64,
    client: Arc<dyn DeviceClient>,
    device_name: String,
    listener: JoinHandle<()>,
}

/// Clears the post-connect flag when setup finishes or is cancelled.
struct SetupGuard<'a>(&'a AtomicBool);

impl<'a> SetupGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConnectivitySupervisor {
    settings: SupervisorSettings,
    connector: Arc<dyn DeviceConnector>,
    discovery: Arc<dyn DiscoveryService>,
    status: StatusHandle,
    publisher: Arc<StatusPublisher>,
    relay: Arc<MediaRelay>,
    me: Weak<Self>,

    active: Mutex<Option<ActiveClient>>,
    state: Mutex<ConnectionState>,
    candidates: Mutex<CandidateList>,

    generation: AtomicU64,
    next_client_id: AtomicU64,
    /// Bumped on every loss and every recovery; a grace watchdog only acts
    /// if nothing happened since it was armed.
    loss_epoch: AtomicU64,
    auto_mode: AtomicBool,
    setup_running: AtomicBool,
    reconnect_pending: AtomicBool,
}

impl ConnectivitySupervisor {
    pub fn new(
        settings: SupervisorSettings,
        connector: Arc<dyn DeviceConnector>,
        discovery: Arc<dyn DiscoveryService>,
        status: StatusHandle,
        publisher: Arc<StatusPublisher>,
        relay: Arc<MediaRelay>,
    ) -> Arc<Self> {
        let candidates = CandidateList::new(settings.retries_per_candidate);
        Arc::new_cyclic(|me| Self {
            settings,
            connector,
            discovery,
            status,
            publisher,
            relay,
            me: me.clone(),
            active: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            candidates: Mutex::new(candidates),
            generation: AtomicU64::new(0),
            next_client_id: AtomicU64::new(1),
            loss_epoch: AtomicU64::new(0),
            auto_mode: AtomicBool::new(false),
            setup_running: AtomicBool::new(false),
            reconnect_pending: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn candidates(&self) -> CandidateList {
        self.candidates.lock().clone()
    }

    pub fn is_auto_mode(&self) -> bool {
        self.auto_mode.load(Ordering::SeqCst)
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredDevice>, DeviceError> {
        self.discovery.discover(self.settings.discovery_timeout).await
    }

    /// Connect to `address`, replacing whatever is connected and stopping
    /// auto-connect.
    pub async fn connect(&self, address: &str) -> Result<(), ConnectError> {
        self.auto_mode.store(false, Ordering::SeqCst);
        let generation = self.bump_generation();
        tracing::info!(address, generation, "explicit connect requested");
        self.connect_with(address, None, generation).await
    }

    /// Run discovery and failover in the background until a device connects.
    pub fn start_auto_connect(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.auto_mode.store(true, Ordering::SeqCst);
        let generation = self.bump_generation();
        tokio::spawn(me.auto_connect_loop(generation));
    }

    /// Stop every loop and close the device.
    pub async fn shutdown(&self) {
        self.auto_mode.store(false, Ordering::SeqCst);
        self.bump_generation();
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
    }

    // ── Connect path ─────────────────────────────────────────────────

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::info!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
    }

    fn current_client(&self) -> Option<(Arc<dyn DeviceClient>, String)> {
        self.active
            .lock()
            .as_ref()
            .map(|a| (a.client.clone(), a.device_name.clone()))
    }

    fn is_active(&self, id: u64) -> bool {
        self.active.lock().as_ref().is_some_and(|a| a.id == id)
    }

    async fn teardown(&self) {
        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            previous.listener.abort();
            previous.client.disconnect().await;
            tracing::debug!(address = previous.client.address(), "previous client closed");
        }
        self.relay.stop();
    }

    /// Close `client` and forget it if it is still the active one.
    async fn discard(&self, id: u64, client: &Arc<dyn DeviceClient>) {
        client.disconnect().await;
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == id) {
            if let Some(a) = active.take() {
                a.listener.abort();
            }
        }
    }

    async fn connect_with(
        &self,
        address: &str,
        name: Option<String>,
        generation: u64,
    ) -> Result<(), ConnectError> {
        self.teardown().await;
        if !self.is_current(generation) {
            return Err(ConnectError::Superseded);
        }
        self.set_state(ConnectionState::Connecting);

        let client = self.connector.create(address);
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let listener = tokio::spawn(listen(self.me.clone(), id, client.subscribe()));
        let device_name = name.unwrap_or_else(|| address.to_owned());
        *self.active.lock() = Some(ActiveClient {
            id,
            client: client.clone(),
            device_name: device_name.clone(),
            listener,
        });

        let result = client.connect(self.settings.connect_timeout).await;
        if !self.is_current(generation) {
            self.discard(id, &client).await;
            return Err(ConnectError::Superseded);
        }

        match result {
            Ok(identity) => {
                client.start_status_polling(self.settings.poll_interval);
                self.reconnect_pending.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    address,
                    device = %device_name,
                    mainboard_id = identity.mainboard_id.as_deref().unwrap_or(""),
                    "printer connected"
                );
                self.status.mark_connected(device_name).await;
                self.post_connect_setup().await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(address, error = %e, "printer connect failed");
                self.discard(id, &client).await;
                self.set_state(ConnectionState::Disconnected);
                self.status.reset().await;
                self.publisher.publish();
                Err(e.into())
            }
        }
    }

    /// Camera renegotiation, relay restart, status refresh, broadcast.
    async fn post_connect_setup(&self) {
        let Some(_guard) = SetupGuard::acquire(&self.setup_running) else {
            tracing::debug!("post-connect setup already running");
            return;
        };
        self.reconnect_pending.store(false, Ordering::SeqCst);
        let Some((client, _)) = self.current_client() else {
            return;
        };

        self.negotiate_camera(&client).await;

        if let Err(e) = client
            .send_command(CMD_STATUS, json!({}), self.settings.command_timeout)
            .await
        {
            tracing::debug!(error = %e, "status refresh failed");
        }
        self.publisher.publish();
    }

    async fn negotiate_camera(&self, client: &Arc<dyn DeviceClient>) {
        let outcome = client
            .send_command(CMD_CAMERA, json!({ "Enable": 1 }), self.settings.command_timeout)
            .await
            .map_err(|e| e.to_string())
            .and_then(|v| {
                serde_json::from_value::<CameraReply>(v)
                    .map_err(|e| format!("unexpected camera reply: {e}"))
            })
            .and_then(CameraReply::into_stream_url);

        match outcome {
            Ok(url) => self.relay.start(url),
            Err(reason) => {
                tracing::warn!(reason = %reason, "camera unavailable");
                self.relay.stop();
                self.status.set_camera(false, Some(reason)).await;
            }
        }
    }

    // ── Device events ────────────────────────────────────────────────

    async fn handle_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Status(raw) => {
                self.status.apply_payload(raw).await;
                self.publisher.publish();
            }
            DeviceEvent::Disconnected { reason } | DeviceEvent::Error(reason) => {
                self.on_connection_lost(&reason).await;
            }
            DeviceEvent::Reconnected => self.on_reconnected().await,
        }
    }

    async fn on_connection_lost(&self, reason: &str) {
        let first_loss = {
            let mut state = self.state.lock();
            let first = *state != ConnectionState::Reconnecting;
            *state = ConnectionState::Reconnecting;
            first
        };
        if first_loss {
            tracing::warn!(reason, "printer connection lost, waiting for reconnect");
        } else {
            tracing::debug!(reason, "printer still unreachable");
        }

        self.reconnect_pending.store(true, Ordering::SeqCst);
        self.relay.stop();
        self.status.reset().await;
        self.publisher.publish();

        if first_loss && self.is_auto_mode() {
            self.arm_grace_watchdog();
        }
    }

    async fn on_reconnected(&self) {
        self.loss_epoch.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        let Some((_, device_name)) = self.current_client() else {
            return;
        };
        self.status.mark_connected(device_name).await;
        if self.reconnect_pending.load(Ordering::SeqCst) {
            self.post_connect_setup().await;
        } else {
            self.publisher.publish();
        }
    }

    fn arm_grace_watchdog(&self) {
        let epoch = self.loss_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.load(Ordering::SeqCst);
        let grace = self.settings.reconnect_grace;
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(sup) = me.upgrade() else {
                return;
            };
            let unchanged = sup.loss_epoch.load(Ordering::SeqCst) == epoch
                && sup.is_current(generation)
                && sup.is_auto_mode()
                && sup.state() == ConnectionState::Reconnecting;
            if !unchanged {
                return;
            }
            tracing::warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "printer did not come back, failing over"
            );
            sup.teardown().await;
            sup.set_state(ConnectionState::Disconnected);
            sup.start_auto_connect();
        });
    }

    // ── Auto-connect ─────────────────────────────────────────────────

    async fn auto_connect_loop(self: Arc<Self>, generation: u64) {
        tracing::info!(generation, "auto-connect started");
        while self.is_current(generation) {
            let candidate = self.candidates.lock().current().cloned();
            let Some(candidate) = candidate else {
                self.refresh_candidates().await;
                continue;
            };

            let result = self
                .connect_with(&candidate.address, Some(candidate.name.clone()), generation)
                .await;
            match result {
                Ok(()) => {
                    self.candidates.lock().record_success();
                    tracing::info!(address = %candidate.address, "auto-connect finished");
                    return;
                }
                Err(ConnectError::Superseded) => break,
                Err(ConnectError::Device(_)) => {
                    let step = self.candidates.lock().record_failure();
                    let delay = match step {
                        FailoverStep::Retry { attempt } => {
                            tracing::info!(address = %candidate.address, attempt, "retrying candidate");
                            self.settings.retry_delay
                        }
                        FailoverStep::Advance { index } => {
                            tracing::info!(index, "failing over to next candidate");
                            self.settings.retry_delay
                        }
                        FailoverStep::Exhausted => {
                            tracing::warn!("all candidates failed, rediscovering");
                            self.settings.rediscovery_delay
                        }
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
        tracing::info!(generation, "auto-connect superseded");
    }

    async fn refresh_candidates(&self) {
        match self.discovery.discover(self.settings.discovery_timeout).await {
            Ok(found) => {
                let total = found.len();
                let usable = {
                    let mut list = self.candidates.lock();
                    list.replace(found);
                    list.len()
                };
                if usable > 0 {
                    tracing::info!(found = total, usable, "printers discovered");
                    return;
                }
                tracing::info!(found = total, "no usable printers found");
            }
            Err(e) => tracing::warn!(error = %e, "discovery failed"),
        }
        tokio::time::sleep(self.settings.rediscovery_delay).await;
    }
}

/// Forward one client's events to the supervisor until it is replaced.
async fn listen(
    supervisor: Weak<ConnectivitySupervisor>,
    id: u64,
    mut events: broadcast::Receiver<DeviceEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "device events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let Some(sup) = supervisor.upgrade() else {
            return;
        };
        if !sup.is_active(id) {
            return;
        }
        sup.handle_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_guard_is_exclusive_and_resets() {
        let flag = AtomicBool::new(false);
        let first = SetupGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(SetupGuard::acquire(&flag).is_none());
        drop(first);
        assert!(SetupGuard::acquire(&flag).is_some());
    }

    #[test]
    fn settings_follow_printer_config() {
        let cfg = PrinterConfig::default();
        let s = SupervisorSettings::from(&cfg);
        assert_eq!(s.retries_per_candidate, 3);
        assert_eq!(s.command_timeout, Duration::from_secs(10));
        assert_eq!(s.poll_interval, Duration::from_secs(2));
        assert_eq!(s.reconnect_grace, Duration::from_secs(30));
    }
}
