use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Camera relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Frames per second relayed to viewers; faster sources are dropped to this.
    #[serde(default = "d_max_fps")]
    pub max_fps: u32,
    /// Identical consecutive relay failures before the process restarts itself.
    #[serde(default = "d_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_retry_delay")]
    pub retry_delay_ms: u64,
    /// Grace period between the restart notice and process exit.
    #[serde(default = "d_flush_delay")]
    pub restart_flush_delay_ms: u64,
    /// Cap on the reframing buffer when no boundary shows up.
    #[serde(default = "d_max_buffer")]
    pub max_buffer_bytes: usize,
    /// Boundary used when the source omits one from its content type.
    #[serde(default = "d_boundary")]
    pub fallback_boundary: String,
    /// Per-viewer queue depth; a viewer that falls further behind skips frames.
    #[serde(default = "d_viewer_queue")]
    pub viewer_queue: usize,
    /// Bound on opening the upstream stream.
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Silence tolerated on an open stream before it counts as failed.
    #[serde(default = "d_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            max_fps: d_max_fps(),
            failure_threshold: d_threshold(),
            retry_delay_ms: d_retry_delay(),
            restart_flush_delay_ms: d_flush_delay(),
            max_buffer_bytes: d_max_buffer(),
            fallback_boundary: d_boundary(),
            viewer_queue: d_viewer_queue(),
            connect_timeout_ms: d_connect_timeout(),
            read_timeout_ms: d_read_timeout(),
        }
    }
}

impl CameraConfig {
    /// Minimum spacing between accepted frames (`1000 / max_fps` ms).
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.max_fps.max(1)))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn restart_flush_delay(&self) -> Duration {
        Duration::from_millis(self.restart_flush_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn d_max_fps() -> u32 {
    15
}
fn d_threshold() -> u32 {
    3
}
fn d_retry_delay() -> u64 {
    5_000
}
fn d_flush_delay() -> u64 {
    1_000
}
fn d_max_buffer() -> usize {
    8 * 1024 * 1024
}
fn d_boundary() -> String {
    "frame".into()
}
fn d_viewer_queue() -> usize {
    4
}
fn d_connect_timeout() -> u64 {
    5_000
}
fn d_read_timeout() -> u64 {
    10_000
}
