//! WebSocket printer client.
//!
//! One [`SdcpClient`] owns one socket to one printer.  Requests are JSON
//! envelopes matched to their responses by `RequestID`; status arrives as
//! unsolicited pushes.  When the socket drops the client reconnects on its
//! own with [`ReconnectBackoff`] and reports the transitions as
//! [`DeviceEvent`]s until [`DeviceClient::disconnect`] is called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pr_protocol::{
    parse_inbound, Inbound, RequestEnvelope, CMD_STATUS, HEARTBEAT_PING, HEARTBEAT_PONG,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::DeviceError;
use crate::reconnect::ReconnectBackoff;
use crate::traits::{DeviceClient, DeviceConnector, DeviceEvent, DeviceIdentity};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SdcpSettings {
    /// Used when the address carries no explicit port.
    pub port: u16,
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the socket is considered dead.
    pub heartbeat_timeout: Duration,
    /// Bound on each reconnect attempt.
    pub reconnect_timeout: Duration,
    /// Bound on each polled status request.
    pub command_timeout: Duration,
    pub backoff: ReconnectBackoff,
    pub event_capacity: usize,
}

impl Default for SdcpSettings {
    fn default() -> Self {
        Self {
            port: 3030,
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            backoff: ReconnectBackoff::default(),
            event_capacity: 256,
        }
    }
}

/// `ws://host:port/websocket`; an explicit `host:port` wins over `default_port`.
pub fn websocket_url(address: &str, default_port: u16) -> String {
    let address = address.trim();
    if address.starts_with("ws://") || address.starts_with("wss://") {
        return address.to_owned();
    }
    let has_port = address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if has_port {
        format!("ws://{address}/websocket")
    } else {
        format!("ws://{address}:{default_port}/websocket")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct SdcpConnector {
    settings: SdcpSettings,
}

impl SdcpConnector {
    pub fn new(settings: SdcpSettings) -> Self {
        Self { settings }
    }
}

impl DeviceConnector for SdcpConnector {
    fn create(&self, address: &str) -> Arc<dyn DeviceClient> {
        Arc::new(SdcpClient::new(address, self.settings.clone()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SdcpClient {
    inner: Arc<Shared>,
}

struct Shared {
    address: String,
    url: String,
    settings: SdcpSettings,
    events: broadcast::Sender<DeviceEvent>,
    /// request_id → waiting caller.
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    /// Writer of the live socket, `None` while disconnected.
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    mainboard_id: Mutex<Option<String>>,
    connected: AtomicBool,
    /// Cancelled by `disconnect`; replaced on every `connect`.
    lifetime: Mutex<CancellationToken>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// The parts of an installed socket the reader loop needs.
struct Session {
    stream: SplitStream<WsStream>,
    outbound: mpsc::Sender<Message>,
    writer: JoinHandle<()>,
}

impl SdcpClient {
    pub fn new(address: &str, settings: SdcpSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            inner: Arc::new(Shared {
                address: address.trim().to_owned(),
                url: websocket_url(address, settings.port),
                settings,
                events,
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                mainboard_id: Mutex::new(None),
                connected: AtomicBool::new(false),
                lifetime: Mutex::new(CancellationToken::new()),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

impl Drop for SdcpClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

#[async_trait]
impl DeviceClient for SdcpClient {
    fn address(&self) -> &str {
        &self.inner.address
    }

    async fn connect(&self, timeout: Duration) -> Result<DeviceIdentity, DeviceError> {
        self.inner.shutdown();
        let token = CancellationToken::new();
        *self.inner.lifetime.lock() = token.clone();

        tracing::info!(url = %self.inner.url, "connecting to printer");
        let ws = self.inner.open(timeout).await?;
        let session = self.inner.install(ws);
        tokio::spawn(self.inner.clone().drive(session, token));

        // Best effort: the first push tells us the mainboard id.
        let probe = timeout.min(Duration::from_secs(2));
        if let Err(e) = self.inner.request(CMD_STATUS, json!({}), probe).await {
            tracing::debug!(error = %e, "initial status request failed");
        }

        Ok(DeviceIdentity {
            address: self.inner.address.clone(),
            mainboard_id: self.inner.mainboard_id.lock().clone(),
        })
    }

    async fn disconnect(&self) {
        self.inner.shutdown();
    }

    async fn send_command(
        &self,
        cmd: u32,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, DeviceError> {
        self.inner.request(cmd, payload, timeout).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    fn start_status_polling(&self, interval: Duration) {
        let token = self.inner.lifetime.lock().clone();
        let shared = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if !shared.connected.load(Ordering::SeqCst) {
                    continue;
                }
                let timeout = shared.settings.command_timeout;
                if let Err(e) = shared.request(CMD_STATUS, json!({}), timeout).await {
                    tracing::debug!(address = %shared.address, error = %e, "status poll failed");
                }
            }
        });
        if let Some(previous) = self.inner.poller.lock().replace(handle) {
            previous.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

impl Shared {
    async fn open(&self, timeout: Duration) -> Result<WsStream, DeviceError> {
        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(self.url.as_str())).await
        {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(DeviceError::Connect {
                url: self.url.clone(),
                message: e.to_string(),
            }),
            Err(_) => Err(DeviceError::ConnectTimeout {
                url: self.url.clone(),
                after: timeout,
            }),
        }
    }

    /// Split the socket, start its writer and publish the sender.
    fn install(&self, ws: WsStream) -> Session {
        let (mut sink, stream) = ws.split();
        let (outbound, mut rx) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        *self.outbound.lock() = Some(outbound.clone());
        self.connected.store(true, Ordering::SeqCst);
        Session {
            stream,
            outbound,
            writer,
        }
    }

    /// Run sessions back to back until the lifetime token is cancelled or
    /// the back-off policy gives up.
    async fn drive(self: Arc<Self>, first: Session, token: CancellationToken) {
        let mut session = first;
        loop {
            let reason = self.pump(session, &token).await;
            self.detach();
            if token.is_cancelled() {
                return;
            }
            tracing::warn!(address = %self.address, reason = %reason, "printer connection lost");
            let _ = self.events.send(DeviceEvent::Disconnected { reason });

            let Some(ws) = self.reopen(&token).await else {
                return;
            };
            session = self.install(ws);
            tracing::info!(address = %self.address, "printer connection restored");
            let _ = self.events.send(DeviceEvent::Reconnected);
        }
    }

    async fn reopen(&self, token: &CancellationToken) -> Option<WsStream> {
        let backoff = &self.settings.backoff;
        let mut attempt: u32 = 0;
        loop {
            if backoff.should_give_up(attempt) {
                tracing::error!(address = %self.address, attempts = attempt, "giving up on reconnect");
                let _ = self
                    .events
                    .send(DeviceEvent::Error(format!("gave up after {attempt} reconnect attempts")));
                return None;
            }
            let delay = backoff.delay_for_attempt(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return None,
            }
            attempt += 1;

            let result = tokio::select! {
                r = self.open(self.settings.reconnect_timeout) => r,
                _ = token.cancelled() => return None,
            };
            match result {
                Ok(ws) => return Some(ws),
                Err(e) => {
                    tracing::debug!(address = %self.address, attempt, error = %e, "reconnect attempt failed");
                    let _ = self.events.send(DeviceEvent::Error(e.to_string()));
                }
            }
        }
    }

    /// Reader loop with heartbeat.  Returns why the session ended.
    async fn pump(&self, session: Session, token: &CancellationToken) -> String {
        let Session {
            mut stream,
            outbound,
            writer,
        } = session;
        let hb = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + hb, hb);
        let mut last_seen = Instant::now();

        let reason = loop {
            tokio::select! {
                _ = token.cancelled() => break "disconnect requested".to_owned(),
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > self.settings.heartbeat_timeout {
                        break "heartbeat timed out".to_owned();
                    }
                    let _ = outbound.try_send(Message::Text(HEARTBEAT_PING.into()));
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        self.handle_text(&text);
                    }
                    Some(Ok(Message::Close(_))) => break "closed by printer".to_owned(),
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed".to_owned(),
                }
            }
        };

        drop(outbound);
        *self.outbound.lock() = None;
        if tokio::time::timeout(Duration::from_millis(250), writer).await.is_err() {
            tracing::trace!("writer did not finish in time");
        }
        reason
    }

    fn handle_text(&self, text: &str) {
        if text == HEARTBEAT_PONG {
            return;
        }
        let envelope = match parse_inbound(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable message from printer");
                return;
            }
        };
        if let Some(id) = envelope.mainboard_id() {
            let mut slot = self.mainboard_id.lock();
            if slot.as_deref() != Some(id) {
                *slot = Some(id.to_owned());
            }
        }
        match envelope.into_inbound() {
            Inbound::Response(data) => match self.pending.lock().remove(&data.request_id) {
                Some(tx) => {
                    let _ = tx.send(data.data);
                }
                None => tracing::trace!(request_id = %data.request_id, "unmatched response"),
            },
            Inbound::Status(status) => {
                let _ = self.events.send(DeviceEvent::Status(status));
            }
            Inbound::Other => tracing::trace!("ignoring printer message"),
        }
    }

    async fn request(&self, cmd: u32, payload: Value, timeout: Duration) -> Result<Value, DeviceError> {
        let outbound = self.outbound.lock().clone().ok_or(DeviceError::NotConnected)?;
        let mainboard_id = self.mainboard_id.lock().clone().unwrap_or_default();
        let envelope = RequestEnvelope::new(cmd, payload, &mainboard_id);
        let request_id = envelope.request_id().to_owned();
        let text = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        if outbound.send(Message::Text(text)).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(DeviceError::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(DeviceError::Closed(cmd)),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(DeviceError::CommandTimeout { cmd, after: timeout })
            }
        }
    }

    /// Forget the current socket.  Dropping the pending senders fails any
    /// in-flight commands with [`DeviceError::Closed`].
    fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        self.pending.lock().clear();
    }

    fn shutdown(&self) {
        self.lifetime.lock().cancel();
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        self.detach();
    }
}
