use serde::{Deserialize, Serialize};

/// Name the relay reports itself under: binary name, OTel `service.name`
/// and tracer name.
pub const SERVICE_NAME: &str = "printrelay";

/// Optional OTLP export of the relay's tracing spans.
///
/// With no endpoint only JSON logs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP gRPC collector, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces kept, `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

impl ObservabilityConfig {
    /// Endpoint to export to, if export is switched on at all.
    ///
    /// A blank endpoint counts as unset so `PR_OTLP_ENDPOINT=` turns
    /// export off without editing the file.
    pub fn export_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn sample_rate_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.sample_rate)
    }
}

fn d_service_name() -> String {
    SERVICE_NAME.into()
}

fn d_sample_rate() -> f64 {
    1.0
}
