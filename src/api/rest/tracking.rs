use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::Stream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::tracking::{LocationSample, SessionHandle};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings/:id/location", post(push_location))
        .route("/bookings/:id/track", get(track_handler))
}

#[derive(Deserialize)]
pub struct PushLocationRequest {
    pub session: Uuid,
    pub lat: f64,
    pub lng: f64,
}

/// Worker-device ingestion. Samples against a closed or replaced session
/// are dropped, not errored: devices routinely lag the state machine.
async fn push_location(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<PushLocationRequest>,
) -> impl IntoResponse {
    let handle = SessionHandle {
        booking_id,
        session: payload.session,
    };
    let accepted = state.tracking.push(handle, payload.lat, payload.lng);

    (StatusCode::ACCEPTED, Json(json!({ "accepted": accepted })))
}

/// Customer-facing tracking feed: latest worker position on connect, then
/// every update, until the booking leaves the en-route phase.
async fn track_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let stream = state.tracking.subscribe(booking_id).ok_or_else(|| {
        AppError::PreconditionFailed("booking has no active tracking session".to_string())
    })?;

    Ok(ws.on_upgrade(move |socket| forward_samples(socket, stream, booking_id)))
}

async fn forward_samples(
    mut socket: WebSocket,
    mut stream: impl Stream<Item = LocationSample> + Unpin,
    booking_id: Uuid,
) {
    info!(booking_id = %booking_id, "tracking viewer connected");

    while let Some(sample) = stream.next().await {
        let json = match serde_json::to_string(&sample) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "failed to serialize location sample");
                continue;
            }
        };

        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    info!(booking_id = %booking_id, "tracking viewer disconnected");
}
