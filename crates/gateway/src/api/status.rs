//! Health probe and the status snapshot.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use pr_domain::status::CanonicalStatus;
use serde::Serialize;

use crate::broadcast::UserCounts;
use crate::media::relay::RelaySnapshot;
use crate::state::AppState;
use crate::supervisor::ConnectionState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health — lightweight health probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
struct StatusResponse {
    printer: CanonicalStatus,
    users: UserCounts,
    connection: ConnectionState,
    relay: RelaySnapshot,
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        printer: (*state.status.snapshot()).clone(),
        users: state.publisher.users(),
        connection: state.supervisor.state(),
        relay: state.relay.snapshot(),
    })
}
