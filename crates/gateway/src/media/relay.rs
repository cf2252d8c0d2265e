//! Upstream camera stream → viewers.
//!
//! ```text
//! Idle → Fetching → Streaming ─┬─ (stream keeps going)
//!            ▲                 └─ failure → FailureRetryScheduled ─┐
//!            └─────────────────────────────────────────────────────┘
//!                              repeated identical failure → FatalRestart
//! ```
//!
//! `FatalRestart` is terminal: viewers get an urgent notice, then the
//! process exits so its supervisor can start it fresh.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use pr_domain::config::CameraConfig;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::broadcast::StatusPublisher;
use crate::status::StatusHandle;

use super::failure::{CameraFailureTracker, FailureVerdict};
use super::multipart::{boundary_from_content_type, MultipartReframer, ReframeError};
use super::throttle::FrameThrottle;
use super::{Frame, ViewerRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Idle,
    Fetching,
    Streaming,
    FailureRetryScheduled,
    FatalRestart,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("camera request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("camera responded with HTTP {0}")]
    Status(u16),
    #[error("camera did not respond within {0}ms")]
    ConnectTimeout(u64),
    #[error("camera stream stalled for {0}ms")]
    ReadTimeout(u64),
    #[error("camera stream ended")]
    Ended,
    #[error(transparent)]
    Reframe(#[from] ReframeError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart signal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raised once the relay gives up; the server shuts down and the process
/// exits non-zero.
#[derive(Clone, Default)]
pub struct RestartSignal {
    notify: Arc<Notify>,
    reason: Arc<Mutex<Option<String>>>,
}

impl RestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        // notify_one keeps a permit if nobody is waiting yet.
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    pub async fn triggered(&self) {
        self.notify.notified().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySnapshot {
    pub state: RelayState,
    pub source: Option<String>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub has_frame: bool,
}

pub struct MediaRelay {
    http: reqwest::Client,
    config: CameraConfig,
    viewers: Arc<ViewerRegistry>,
    status: StatusHandle,
    publisher: Arc<StatusPublisher>,
    restart: RestartSignal,
    state: Mutex<RelayState>,
    tracker: Mutex<CameraFailureTracker>,
    source: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaRelay {
    pub fn new(
        http: reqwest::Client,
        config: CameraConfig,
        viewers: Arc<ViewerRegistry>,
        status: StatusHandle,
        publisher: Arc<StatusPublisher>,
        restart: RestartSignal,
    ) -> Self {
        let tracker = CameraFailureTracker::new(config.failure_threshold);
        Self {
            http,
            config,
            viewers,
            status,
            publisher,
            restart,
            state: Mutex::new(RelayState::Idle),
            tracker: Mutex::new(tracker),
            source: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.viewers.latest()
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let tracker = self.tracker.lock();
        RelaySnapshot {
            state: self.state(),
            source: self.source.lock().clone(),
            consecutive_failures: tracker.consecutive(),
            last_error: tracker.last_error().map(str::to_owned),
            has_frame: self.viewers.latest().is_some(),
        }
    }

    /// (Re)start relaying from `url`, replacing any running loop.
    pub fn start(self: &Arc<Self>, url: String) {
        if self.state() == RelayState::FatalRestart {
            tracing::warn!(url = %url, "relay is restarting the process, ignoring start");
            return;
        }
        tracing::info!(url = %url, "starting camera relay");
        *self.source.lock() = Some(url.clone());
        let handle = tokio::spawn(self.clone().run(url));
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop relaying and drop the cached frame.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("camera relay stopped");
        }
        let mut state = self.state.lock();
        if *state != RelayState::FatalRestart {
            *state = RelayState::Idle;
        }
        self.viewers.clear_latest();
    }

    fn set_state(&self, next: RelayState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "relay state");
            *state = next;
        }
    }

    async fn run(self: Arc<Self>, url: String) {
        loop {
            self.set_state(RelayState::Fetching);
            let err = match self.stream_once(&url).await {
                Ok(()) => RelayError::Ended,
                Err(e) => e,
            };
            let reason = err.to_string();
            tracing::warn!(url = %url, error = %reason, "camera relay failed");

            let verdict = self.tracker.lock().record(&reason);
            self.status.set_camera(false, Some(reason.clone())).await;
            self.publisher.publish();

            match verdict {
                FailureVerdict::Fatal { consecutive } => {
                    self.enter_fatal(&reason, consecutive);
                    return;
                }
                FailureVerdict::Retry { consecutive } => {
                    self.set_state(RelayState::FailureRetryScheduled);
                    tracing::info!(
                        consecutive,
                        delay_ms = self.config.retry_delay_ms,
                        "camera relay retry scheduled"
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Pump one upstream response until it fails or ends.
    async fn stream_once(&self, url: &str) -> Result<(), RelayError> {
        let connect_timeout = self.config.connect_timeout();
        let response = tokio::time::timeout(connect_timeout, self.http.get(url).send())
            .await
            .map_err(|_| RelayError::ConnectTimeout(self.config.connect_timeout_ms))??;
        if !response.status().is_success() {
            return Err(RelayError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let boundary = boundary_from_content_type(content_type, &self.config.fallback_boundary);
        tracing::debug!(boundary = %boundary, "camera stream open");

        let mut reframer = MultipartReframer::new(&boundary, self.config.max_buffer_bytes);
        let mut throttle = FrameThrottle::new(self.config.frame_interval());
        let read_timeout = self.config.read_timeout();
        let mut body = response.bytes_stream();

        loop {
            let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
                Err(_) => return Err(RelayError::ReadTimeout(self.config.read_timeout_ms)),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk?,
            };
            for frame in reframer.push(&chunk)? {
                if throttle.admit(Instant::now()) {
                    self.accept(frame).await;
                }
            }
        }
    }

    async fn accept(&self, frame: Frame) {
        let out = self.viewers.fan_out(&frame);
        if self.state() != RelayState::Streaming {
            self.set_state(RelayState::Streaming);
            self.tracker.lock().reset();
            self.status.set_camera(true, None).await;
            self.publisher.publish();
            tracing::info!("camera relay streaming");
        } else if out.removed > 0 {
            self.publisher.publish();
        }
    }

    /// The flush delay runs on its own task: `stop()` aborts the relay
    /// loop, and the restart must still happen once announced.
    fn enter_fatal(&self, reason: &str, consecutive: u32) {
        self.set_state(RelayState::FatalRestart);
        let notice = format!("camera relay failed {consecutive} times in a row: {reason}");
        tracing::error!(reason = %notice, "camera relay wedged, restarting process");
        self.publisher.announce_restart(&notice);

        let restart = self.restart.clone();
        let flush = self.config.restart_flush_delay();
        tokio::spawn(async move {
            tokio::time::sleep(flush).await;
            restart.trigger(notice);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restart_signal_keeps_permit() {
        let signal = RestartSignal::new();
        assert!(!signal.is_triggered());
        signal.trigger("wedged");
        // Waiter arrives after the trigger and still wakes.
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.triggered())
            .await
            .unwrap();
        assert_eq!(signal.reason().as_deref(), Some("wedged"));
    }
}
