//! Camera endpoints.
//!
//! - `GET /video`               — MJPEG stream, cached frame first
//! - `GET /api/camera/snapshot` — latest frame as a single image

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};

use crate::broadcast::Subscription;
use crate::media::Frame;
use crate::state::AppState;

use super::api_error;

/// Boundary used towards viewers, independent of the upstream one.
pub const VIEWER_BOUNDARY: &str = "frame";

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Detaches the viewer when the response body is dropped.
struct ViewerGuard {
    id: u64,
    state: AppState,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.state.viewers.detach(self.id);
        self.state.publisher.publish();
        tracing::info!(viewer = self.id, "camera viewer disconnected");
    }
}

pub async fn video(State(state): State<AppState>) -> Response {
    let Subscription { id, mut rx } = state.viewers.attach();
    tracing::info!(viewer = id, "camera viewer connected");
    state.publisher.publish();

    let guard = ViewerGuard {
        id,
        state: state.clone(),
    };
    let body = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok::<_, Infallible>(encode_part(&frame));
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={VIEWER_BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, NO_CACHE.to_owned()),
            (header::PRAGMA, "no-cache".to_owned()),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

pub async fn snapshot(State(state): State<AppState>) -> Response {
    match state.relay.latest_frame() {
        Some(frame) => (
            [
                (header::CONTENT_TYPE, frame.content_type.to_string()),
                (header::CACHE_CONTROL, NO_CACHE.to_owned()),
            ],
            frame.data,
        )
            .into_response(),
        None => api_error(StatusCode::NOT_FOUND, "no camera frame available"),
    }
}

/// One multipart part: delimiter, headers, image, trailing CRLF.
pub fn encode_part(frame: &Frame) -> Bytes {
    let head = format!(
        "--{VIEWER_BOUNDARY}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        frame.content_type,
        frame.data.len()
    );
    let mut out = BytesMut::with_capacity(head.len() + frame.data.len() + 2);
    out.put_slice(head.as_bytes());
    out.put_slice(&frame.data);
    out.put_slice(b"\r\n");
    out.freeze()
}
