//! Status actor: the single owner of [`CanonicalStatus`].
//!
//! Every mutation is a [`StatusCommand`] sent over an mpsc channel and
//! applied in order by one task.  Readers never lock anything; they take
//! the latest snapshot from a `watch` channel.

use std::sync::Arc;

use chrono::Utc;
use pr_domain::projector;
use pr_domain::status::CanonicalStatus;
use pr_protocol::PrinterStatus;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum StatusCommand {
    /// Replace everything with the disconnected defaults.
    Reset,
    /// The device socket is up.
    Connected { device_name: String },
    /// Patch from a raw device status push.
    Payload(Box<PrinterStatus>),
    /// Camera availability and the reason when unavailable.
    Camera {
        available: bool,
        error: Option<String>,
    },
}

type Envelope = (StatusCommand, oneshot::Sender<Arc<CanonicalStatus>>);

/// Cheap, cloneable handle to the status actor.
#[derive(Clone)]
pub struct StatusHandle {
    tx: mpsc::Sender<Envelope>,
    snapshot: watch::Receiver<Arc<CanonicalStatus>>,
}

impl StatusHandle {
    /// Spawn the actor.  It stops once every handle is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let initial = Arc::new(CanonicalStatus::disconnected(Utc::now()));
        let (snapshot_tx, snapshot) = watch::channel(initial.clone());
        let (tx, rx) = mpsc::channel::<Envelope>(256);
        let task = tokio::spawn(run(rx, snapshot_tx, initial));
        (Self { tx, snapshot }, task)
    }

    /// Apply `cmd` and return the status it produced.
    pub async fn update(&self, cmd: StatusCommand) -> Arc<CanonicalStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((cmd, reply_tx)).await.is_err() {
            tracing::warn!("status actor is gone, returning last snapshot");
            return self.snapshot();
        }
        reply_rx.await.unwrap_or_else(|_| self.snapshot())
    }

    pub async fn reset(&self) -> Arc<CanonicalStatus> {
        self.update(StatusCommand::Reset).await
    }

    pub async fn mark_connected(&self, device_name: impl Into<String>) -> Arc<CanonicalStatus> {
        self.update(StatusCommand::Connected {
            device_name: device_name.into(),
        })
        .await
    }

    pub async fn apply_payload(&self, raw: PrinterStatus) -> Arc<CanonicalStatus> {
        self.update(StatusCommand::Payload(Box::new(raw))).await
    }

    pub async fn set_camera(&self, available: bool, error: Option<String>) -> Arc<CanonicalStatus> {
        self.update(StatusCommand::Camera { available, error }).await
    }

    pub fn snapshot(&self) -> Arc<CanonicalStatus> {
        self.snapshot.borrow().clone()
    }
}

async fn run(
    mut rx: mpsc::Receiver<Envelope>,
    snapshot_tx: watch::Sender<Arc<CanonicalStatus>>,
    initial: Arc<CanonicalStatus>,
) {
    let mut current = (*initial).clone();
    while let Some((cmd, reply)) = rx.recv().await {
        apply(&mut current, cmd);
        let snapshot = Arc::new(current.clone());
        snapshot_tx.send_replace(snapshot.clone());
        let _ = reply.send(snapshot);
    }
    tracing::debug!("status actor stopped");
}

fn apply(status: &mut CanonicalStatus, cmd: StatusCommand) {
    let now = Utc::now();
    match cmd {
        StatusCommand::Reset => *status = CanonicalStatus::disconnected(now),
        StatusCommand::Connected { device_name } => {
            status.connected = true;
            status.device_name = device_name;
            status.last_update = now;
        }
        StatusCommand::Payload(raw) => projector::apply_payload(status, &raw, now),
        StatusCommand::Camera { available, error } => {
            status.camera_available = available;
            status.camera_error = if available { None } else { error };
            status.last_update = now;
        }
    }
}
