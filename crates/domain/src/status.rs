//! Canonical printer status: the single model every observer sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized state label shared by the machine, job and consolidated views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusLabel {
    Idle,
    Printing,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Loading,
    FileTransfer,
    Calibrating,
    SelfTest,
    Error,
    Unknown,
}

impl StatusLabel {
    pub fn is_known(self) -> bool {
        self != StatusLabel::Unknown
    }
}

/// A label together with the raw code it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedState {
    pub state: StatusLabel,
    pub code: Option<i64>,
}

impl CodedState {
    pub const UNKNOWN: CodedState = CodedState {
        state: StatusLabel::Unknown,
        code: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBlock {
    pub consolidated: StatusLabel,
    pub machine: CodedState,
    pub job: CodedState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layers {
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperaturePair {
    pub current: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub bed: TemperaturePair,
    pub nozzle: TemperaturePair,
    pub enclosure: TemperaturePair,
}

/// Everything observers know about the printer.
///
/// Replaced wholesale on disconnect, patched field by field while
/// connected.  See [`crate::projector::apply_payload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalStatus {
    pub connected: bool,
    pub device_name: String,
    pub status: StatusBlock,
    pub progress: f64,
    pub print_time_seconds: u64,
    pub remaining_time_seconds: u64,
    pub layers: Layers,
    pub temperatures: Temperatures,
    pub camera_available: bool,
    pub camera_error: Option<String>,
    pub last_update: DateTime<Utc>,
    pub previous_consolidated: Option<StatusLabel>,
}

impl CanonicalStatus {
    /// The default, disconnected status stamped at `now`.
    pub fn disconnected(now: DateTime<Utc>) -> Self {
        Self {
            connected: false,
            device_name: String::new(),
            status: StatusBlock {
                consolidated: StatusLabel::Idle,
                machine: CodedState::UNKNOWN,
                job: CodedState::UNKNOWN,
            },
            progress: 0.0,
            print_time_seconds: 0,
            remaining_time_seconds: 0,
            layers: Layers::default(),
            temperatures: Temperatures::default(),
            camera_available: false,
            camera_error: None,
            last_update: now,
            previous_consolidated: None,
        }
    }

    /// Replace the consolidated label, remembering the old one.  Unknown
    /// labels never overwrite a known value.
    pub fn set_consolidated(&mut self, label: StatusLabel) {
        if !label.is_known() || label == self.status.consolidated {
            return;
        }
        self.previous_consolidated = Some(self.status.consolidated);
        self.status.consolidated = label;
    }
}

impl Default for CanonicalStatus {
    fn default() -> Self {
        Self::disconnected(Utc::now())
    }
}
