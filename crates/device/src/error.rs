use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("connecting to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("connecting to {url} timed out after {}ms", .after.as_millis())]
    ConnectTimeout { url: String, after: Duration },

    #[error("command {cmd} timed out after {}ms", .after.as_millis())]
    CommandTimeout { cmd: u32, after: Duration },

    #[error("not connected to the printer")]
    NotConnected,

    #[error("connection closed before command {0} was answered")]
    Closed(u32),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceError {
    /// Transient errors are retried by the caller; none of these are fatal.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DeviceError::ConnectTimeout { .. } | DeviceError::CommandTimeout { .. }
        )
    }
}
