//! Device protocol: JSON envelopes exchanged with the printer over its
//! WebSocket endpoint, plus the UDP discovery reply.
//!
//! Every request carries a `RequestID`; the printer answers on the
//! `sdcp/response/<MainboardID>` topic with the same id.  Status is pushed
//! unsolicited on `sdcp/status/<MainboardID>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request a full status push.
pub const CMD_STATUS: u32 = 0;
/// Request the attribute block (name, firmware, capabilities).
pub const CMD_ATTRIBUTES: u32 = 1;
/// Enable or disable the camera stream.
pub const CMD_CAMERA: u32 = 386;

/// Text frame the client sends to keep the socket alive.
pub const HEARTBEAT_PING: &str = "ping";
/// Text frame the printer answers a heartbeat with.
pub const HEARTBEAT_PONG: &str = "pong";

/// UDP payload that makes printers on the LAN announce themselves.
pub const DISCOVERY_PROBE: &str = "M99999";

/// `From` value identifying a LAN client.
const FROM_LAN_CLIENT: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestEnvelope {
    pub id: String,
    pub data: RequestData,
    pub topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestData {
    pub cmd: u32,
    pub data: Value,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "MainboardID")]
    pub mainboard_id: String,
    pub time_stamp: i64,
    pub from: u32,
}

impl RequestEnvelope {
    /// Build a request for `cmd`.  `mainboard_id` may be empty before the
    /// printer has identified itself; printers accept that for status and
    /// attribute requests.
    pub fn new(cmd: u32, data: Value, mainboard_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            data: RequestData {
                cmd,
                data,
                request_id: uuid::Uuid::new_v4().simple().to_string(),
                mainboard_id: mainboard_id.to_owned(),
                time_stamp: chrono::Utc::now().timestamp(),
                from: FROM_LAN_CLIENT,
            },
            topic: format!("sdcp/request/{mainboard_id}"),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.data.request_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any JSON message received from the printer.  Which fields are
/// present depends on the topic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InboundEnvelope {
    pub topic: Option<String>,
    pub data: Option<ResponseData>,
    pub status: Option<PrinterStatus>,
    #[serde(rename = "MainboardID")]
    pub mainboard_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseData {
    #[serde(default)]
    pub cmd: u32,
    #[serde(default)]
    pub data: Value,
    #[serde(rename = "RequestID", default)]
    pub request_id: String,
    #[serde(rename = "MainboardID", default)]
    pub mainboard_id: Option<String>,
}

/// Inbound message after topic dispatch.
#[derive(Debug, Clone)]
pub enum Inbound {
    Response(ResponseData),
    Status(PrinterStatus),
    /// Attribute pushes, notices and anything this crate does not model.
    Other,
}

impl InboundEnvelope {
    /// The mainboard id, wherever the printer put it.
    pub fn mainboard_id(&self) -> Option<&str> {
        self.mainboard_id
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|d| d.mainboard_id.as_deref()))
            .filter(|id| !id.is_empty())
    }

    /// Dispatch on the topic; falls back to which payload is present for
    /// firmware that omits the topic.
    pub fn into_inbound(self) -> Inbound {
        let topic = self.topic.as_deref().unwrap_or("");
        if topic.starts_with("sdcp/response/") {
            return self.data.map_or(Inbound::Other, Inbound::Response);
        }
        if topic.starts_with("sdcp/status/") {
            return self.status.map_or(Inbound::Other, Inbound::Status);
        }
        if topic.is_empty() {
            if let Some(status) = self.status {
                return Inbound::Status(status);
            }
            if let Some(data) = self.data.filter(|d| !d.request_id.is_empty()) {
                return Inbound::Response(data);
            }
        }
        Inbound::Other
    }
}

/// Parse one text frame from the printer.
pub fn parse_inbound(text: &str) -> serde_json::Result<InboundEnvelope> {
    serde_json::from_str(text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw status block.  Every field is optional: pushes are often partial
/// and only carry what changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PrinterStatus {
    #[serde(deserialize_with = "lenient_codes")]
    pub current_status: Option<Vec<i64>>,
    pub print_info: Option<PrintInfo>,
    #[serde(deserialize_with = "lenient")]
    pub temp_of_hotbed: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub temp_target_hotbed: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub temp_of_nozzle: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub temp_target_nozzle: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub temp_of_box: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub temp_target_box: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PrintInfo {
    #[serde(deserialize_with = "lenient")]
    pub status: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub current_layer: Option<u32>,
    #[serde(deserialize_with = "lenient")]
    pub total_layer: Option<u32>,
    /// Elapsed print time in seconds.
    #[serde(deserialize_with = "lenient")]
    pub current_ticks: Option<f64>,
    /// Estimated total print time in seconds.
    #[serde(deserialize_with = "lenient")]
    pub total_ticks: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub progress: Option<f64>,
    pub filename: Option<String>,
}

/// Numbers may arrive as JSON numbers or numeric strings depending on
/// firmware.  Anything else reads as absent so one odd field never drops
/// the whole push.
fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned + std::str::FromStr,
{
    let raw = Value::deserialize(de)?;
    Ok(number_from(raw))
}

fn lenient_codes<'de, D>(de: D) -> Result<Option<Vec<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => Some(items.into_iter().filter_map(number_from).collect()),
        single => number_from(single).map(|code| vec![code]),
    })
}

fn number_from<T>(raw: Value) -> Option<T>
where
    T: serde::de::DeserializeOwned + std::str::FromStr,
{
    match raw {
        Value::Number(_) => serde_json::from_value(raw).ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl PrinterStatus {
    /// The machine-level state code (first entry of `CurrentStatus`).
    pub fn machine_code(&self) -> Option<i64> {
        self.current_status.as_ref().and_then(|c| c.first().copied())
    }

    /// The job-level state code (`PrintInfo.Status`).
    pub fn job_code(&self) -> Option<i64> {
        self.print_info.as_ref().and_then(|p| p.status)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Camera
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Payload of a `CMD_CAMERA` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CameraReply {
    pub ack: i64,
    pub video_url: Option<String>,
}

impl CameraReply {
    /// `Ok(url)` with a fetchable `http://` URL, or `Err(reason)` with a
    /// human-readable rejection reason.
    pub fn into_stream_url(self) -> Result<String, String> {
        if let Some(reason) = camera_ack_reason(self.ack) {
            return Err(reason);
        }
        match self.video_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(normalize_video_url(&url)),
            None => Err("printer did not return a camera URL".into()),
        }
    }
}

/// Human-readable reason for a non-zero camera ack code.
pub fn camera_ack_reason(ack: i64) -> Option<String> {
    match ack {
        0 => None,
        1 => Some("too many camera connections on the printer".into()),
        2 => Some("camera not supported by this printer".into()),
        other => Some(format!("camera request rejected (ack {other})")),
    }
}

/// Printers report the stream as `host:port/path`; make it a URL.
pub fn normalize_video_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reply to [`DISCOVERY_PROBE`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryReply {
    #[serde(default)]
    pub id: Option<String>,
    pub data: DiscoveryData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscoveryData {
    pub name: Option<String>,
    pub machine_name: Option<String>,
    pub brand_name: Option<String>,
    #[serde(rename = "MainboardIP")]
    pub mainboard_ip: Option<String>,
    #[serde(rename = "MainboardID")]
    pub mainboard_id: Option<String>,
    pub protocol_version: Option<String>,
    pub firmware_version: Option<String>,
    /// Set by relays that re-advertise a printer living elsewhere.
    pub proxy: Option<bool>,
}

impl DiscoveryData {
    /// Best display name available.
    pub fn display_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.machine_name.as_deref())
            .filter(|n| !n.is_empty())
    }
}
