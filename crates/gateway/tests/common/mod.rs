//! Scripted device seams shared by the gateway integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pr_device::{
    DeviceClient, DeviceConnector, DeviceError, DeviceEvent, DeviceIdentity, DiscoveredDevice,
    DiscoveryService,
};
use pr_domain::config::Config;
use pr_gateway::bootstrap;
use pr_gateway::media::RestartSignal;
use pr_gateway::state::AppState;
use pr_protocol::CMD_CAMERA;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};

/// Ordered record of `discover` and `connect:<address>` calls.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct MockClient {
    address: String,
    reachable: bool,
    camera_url: Option<String>,
    log: Log,
    events: broadcast::Sender<DeviceEvent>,
    connected: AtomicBool,
    commands: Mutex<Vec<u32>>,
    camera_gate: Option<Arc<Semaphore>>,
}

impl MockClient {
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    pub fn commands(&self) -> Vec<u32> {
        self.commands.lock().clone()
    }

    pub fn camera_requests(&self) -> usize {
        self.commands().iter().filter(|c| **c == CMD_CAMERA).count()
    }
}

#[async_trait]
impl DeviceClient for MockClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, _timeout: Duration) -> Result<DeviceIdentity, DeviceError> {
        self.log.push(format!("connect:{}", self.address));
        if !self.reachable {
            return Err(DeviceError::Connect {
                url: format!("ws://{}:3030/websocket", self.address),
                message: "connection refused".into(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(DeviceIdentity {
            address: self.address.clone(),
            mainboard_id: Some(format!("mb-{}", self.address)),
        })
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send_command(
        &self,
        cmd: u32,
        _payload: Value,
        _timeout: Duration,
    ) -> Result<Value, DeviceError> {
        self.commands.lock().push(cmd);
        if cmd == CMD_CAMERA {
            if let Some(gate) = &self.camera_gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            return Ok(match &self.camera_url {
                Some(url) => json!({ "Ack": 0, "VideoUrl": url }),
                None => json!({ "Ack": 2 }),
            });
        }
        Ok(json!({ "Ack": 0 }))
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    fn start_status_polling(&self, _interval: Duration) {}

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── Connector ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockConnector {
    pub log: Log,
    reachable: Mutex<HashSet<String>>,
    camera_url: Mutex<Option<String>>,
    camera_gate: Mutex<Option<Arc<Semaphore>>>,
    clients: Mutex<Vec<Arc<MockClient>>>,
}

impl MockConnector {
    pub fn set_reachable(&self, address: &str) {
        self.reachable.lock().insert(address.to_owned());
    }

    pub fn set_camera_url(&self, url: &str) {
        *self.camera_url.lock() = Some(url.to_owned());
    }

    /// Camera commands on clients created from now on block until the
    /// returned semaphore hands out a permit.
    pub fn hold_camera(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.camera_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn last_client(&self) -> Arc<MockClient> {
        self.clients.lock().last().cloned().expect("no client created")
    }

    pub fn created(&self) -> usize {
        self.clients.lock().len()
    }
}

impl DeviceConnector for MockConnector {
    fn create(&self, address: &str) -> Arc<dyn DeviceClient> {
        let (events, _) = broadcast::channel(64);
        let client = Arc::new(MockClient {
            address: address.to_owned(),
            reachable: self.reachable.lock().contains(address),
            camera_url: self.camera_url.lock().clone(),
            log: self.log.clone(),
            events,
            connected: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            camera_gate: self.camera_gate.lock().clone(),
        });
        self.clients.lock().push(client.clone());
        client
    }
}

// ── Discovery ────────────────────────────────────────────────────────

pub struct MockDiscovery {
    log: Log,
    devices: Mutex<Vec<DiscoveredDevice>>,
}

impl MockDiscovery {
    pub fn set_devices(&self, devices: Vec<DiscoveredDevice>) {
        *self.devices.lock() = devices;
    }
}

#[async_trait]
impl DiscoveryService for MockDiscovery {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>, DeviceError> {
        self.log.push("discover");
        Ok(self.devices.lock().clone())
    }
}

pub fn device(address: &str, name: &str, is_proxy: bool) -> DiscoveredDevice {
    DiscoveredDevice {
        address: address.into(),
        name: name.into(),
        is_proxy,
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub state: AppState,
    pub connector: Arc<MockConnector>,
    pub discovery: Arc<MockDiscovery>,
    pub log: Log,
}

pub fn harness(config: Config) -> Harness {
    let connector = Arc::new(MockConnector::default());
    let log = connector.log.clone();
    let discovery = Arc::new(MockDiscovery {
        log: log.clone(),
        devices: Mutex::new(Vec::new()),
    });
    let state = bootstrap::assemble(
        Arc::new(config),
        connector.clone(),
        discovery.clone(),
        reqwest::Client::new(),
        RestartSignal::new(),
    );
    Harness {
        state,
        connector,
        discovery,
        log,
    }
}

/// Wait until the published status satisfies `pred`.
///
/// The limit is generous because paused-clock tests sit through retry
/// delays while waiting.
pub async fn wait_status(
    state: &AppState,
    pred: impl Fn(&pr_domain::status::CanonicalStatus) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !pred(&state.status.snapshot()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status condition not reached");
}
