//! AppState construction and background-task spawning extracted from `main.rs`.
//!
//! `build_app_state` wires the production device stack; `assemble` takes the
//! device seams as arguments so tests can drive the gateway against fakes.

use std::sync::Arc;

use anyhow::Context;

use pr_device::{DeviceConnector, DiscoveryService, SdcpConnector, SdcpSettings, UdpDiscovery};
use pr_domain::config::{Config, ConfigSeverity};

use crate::broadcast::{BroadcastGate, StatusPublisher, StatusSubscribers};
use crate::media::{MediaRelay, RestartSignal, ViewerRegistry};
use crate::state::AppState;
use crate::status::StatusHandle;
use crate::supervisor::{ConnectivitySupervisor, SupervisorSettings};

/// Validate config, build the device stack and return a fully-wired
/// [`AppState`].  Must be called inside a Tokio runtime.
pub fn build_app_state(config: Arc<Config>, restart: RestartSignal) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Device stack ─────────────────────────────────────────────────
    let settings = SdcpSettings {
        port: config.printer.websocket_port,
        command_timeout: config.printer.command_timeout(),
        reconnect_timeout: config.printer.connect_timeout(),
        ..SdcpSettings::default()
    };
    let connector: Arc<dyn DeviceConnector> = Arc::new(SdcpConnector::new(settings));
    let discovery: Arc<dyn DiscoveryService> =
        Arc::new(UdpDiscovery::new(config.printer.discovery_port));
    tracing::info!(
        websocket_port = config.printer.websocket_port,
        discovery_port = config.printer.discovery_port,
        "device stack ready"
    );

    // ── Camera HTTP client ───────────────────────────────────────────
    let http = reqwest::Client::builder()
        .connect_timeout(config.camera.connect_timeout())
        .build()
        .context("building camera HTTP client")?;

    Ok(assemble(config, connector, discovery, http, restart))
}

/// Wire every component around the given device seams.
pub fn assemble(
    config: Arc<Config>,
    connector: Arc<dyn DeviceConnector>,
    discovery: Arc<dyn DiscoveryService>,
    http: reqwest::Client,
    restart: RestartSignal,
) -> AppState {
    // ── Status actor ─────────────────────────────────────────────────
    let (status, _actor) = StatusHandle::spawn();

    // ── Fan-out ──────────────────────────────────────────────────────
    let subscribers = Arc::new(StatusSubscribers::new(config.broadcast.subscriber_queue));
    let viewers = Arc::new(ViewerRegistry::with_replay(config.camera.viewer_queue));
    let gate = BroadcastGate::new(config.broadcast.interval(), subscribers.clone());
    let publisher = Arc::new(StatusPublisher::new(
        status.clone(),
        gate,
        subscribers.clone(),
        viewers.clone(),
    ));
    tracing::info!(
        interval_ms = config.broadcast.interval_ms,
        max_fps = config.camera.max_fps,
        "broadcast gate ready"
    );

    // ── Relay + supervisor ───────────────────────────────────────────
    let relay = Arc::new(MediaRelay::new(
        http,
        config.camera.clone(),
        viewers.clone(),
        status.clone(),
        publisher.clone(),
        restart.clone(),
    ));
    let supervisor = ConnectivitySupervisor::new(
        SupervisorSettings::from(&config.printer),
        connector,
        discovery,
        status.clone(),
        publisher.clone(),
        relay.clone(),
    );

    AppState {
        config,
        status,
        subscribers,
        viewers,
        publisher,
        supervisor,
        relay,
        restart,
    }
}

/// Start connecting: the configured address if there is one, otherwise
/// discovery-driven auto-connect.
pub fn spawn_background_tasks(state: &AppState) {
    match state.config.printer.address.clone() {
        Some(address) => {
            let supervisor = state.supervisor.clone();
            tokio::spawn(async move {
                if let Err(e) = supervisor.connect(&address).await {
                    // The device client keeps retrying only once a first
                    // connection succeeded; fall back to discovery.
                    tracing::warn!(address = %address, error = %e, "configured printer unreachable, auto-connecting");
                    supervisor.start_auto_connect();
                }
            });
        }
        None => {
            tracing::info!("no printer address configured, starting auto-connect");
            state.supervisor.start_auto_connect();
        }
    }
}
