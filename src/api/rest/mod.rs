pub mod bookings;
pub mod dispatch;
pub mod tracking;
pub mod ws;

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::worker::{ActorRef, ActorRole};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(dispatch::router())
        .merge(bookings::router())
        .merge(tracking::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::events_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Caller-supplied actor identity. Authentication is the token service's
/// concern; the engine only insists the identity arrives explicitly with
/// the request instead of being read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct ActorContext(pub ActorRef);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, "x-actor-id")?
            .parse::<Uuid>()
            .map_err(|_| AppError::BadRequest("x-actor-id must be a uuid".to_string()))?;
        let role = header(parts, "x-actor-role")?
            .parse::<ActorRole>()
            .map_err(|_| {
                AppError::BadRequest(
                    "x-actor-role must be customer, owner or worker".to_string(),
                )
            })?;

        Ok(ActorContext(ActorRef { id, role }))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest(format!("missing {name} header")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    carwashes: usize,
    workers: usize,
    bookings: usize,
    tracking_sessions: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        carwashes: state.carwashes.len(),
        workers: state.workers.len(),
        bookings: state.bookings.len(),
        tracking_sessions: state.tracking.active_sessions(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
