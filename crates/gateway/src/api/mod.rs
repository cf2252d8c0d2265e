pub mod printer;
pub mod status;
pub mod video;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.  Everything is public: the gateway is meant for
/// a trusted LAN.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(status::health))
        .route("/api/status", get(status::status))
        .route("/ws", get(ws::status_ws))
        .route("/video", get(video::video))
        .route("/api/camera/snapshot", get(video::snapshot))
        .route("/api/printer/connect", post(printer::connect))
        .route("/api/printer/discover", get(printer::discover))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
