//! Printer control endpoints.
//!
//! - `POST /api/printer/connect`  — connect to an explicit address
//! - `GET  /api/printer/discover` — run LAN discovery once

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::api_error;

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Serialize)]
struct ConnectResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn connect(State(state): State<AppState>, Json(req): Json<ConnectRequest>) -> Response {
    let address = req.address.trim();
    if address.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "address is required");
    }

    match state.supervisor.connect(address).await {
        Ok(()) => Json(ConnectResponse {
            success: true,
            error: None,
        })
        .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ConnectResponse {
                success: false,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

pub async fn discover(State(state): State<AppState>) -> Response {
    match state.supervisor.discover().await {
        Ok(devices) => Json(serde_json::json!({ "devices": devices })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "discovery request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
