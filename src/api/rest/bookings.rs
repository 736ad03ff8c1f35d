use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::ActorContext;
use crate::engine::capacity::SlotWindow;
use crate::engine::lifecycle::{self, NewBooking, TransitionResult};
use crate::error::AppError;
use crate::models::booking::{Booking, BookingStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/status", post(update_status))
        .route("/carwashes/:id/bookings", get(list_carwash_bookings))
        .route("/carwashes/:id/availability", get(availability))
}

/// Booking plus the live verification code for home jobs; the code lives in
/// the handshake verifier, not on the booking record.
#[derive(Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
}

fn view(state: &AppState, booking: Booking) -> BookingView {
    let verification_code = booking
        .kind
        .is_home()
        .then(|| state.handshake.peek(booking.id))
        .flatten();

    BookingView {
        booking,
        verification_code,
    }
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    ActorContext(actor): ActorContext,
    Json(params): Json<NewBooking>,
) -> Result<Json<Booking>, AppError> {
    let booking = lifecycle::create_booking(&state, params, actor)?;
    Ok(Json(booking))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state
        .bookings
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?
        .clone();

    Ok(Json(view(&state, booking)))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub target_status: BookingStatus,
    pub verification_code: Option<String>,
    pub expected_version: Option<u64>,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    ActorContext(actor): ActorContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<TransitionResult>, AppError> {
    let result = lifecycle::transition(
        &state,
        id,
        payload.target_status,
        payload.verification_code.as_deref(),
        payload.expected_version,
        actor,
    )?;

    Ok(Json(result))
}

/// Read-only snapshot; tolerates transitions racing the listing.
async fn list_carwash_bookings(
    State(state): State<Arc<AppState>>,
    Path(carwash_id): Path<Uuid>,
) -> Result<Json<Vec<Booking>>, AppError> {
    if !state.carwashes.contains_key(&carwash_id) {
        return Err(AppError::NotFound(format!("carwash {carwash_id} not found")));
    }

    let bookings = state
        .bookings
        .iter()
        .filter(|entry| entry.value().carwash_id == carwash_id)
        .map(|entry| entry.value().clone())
        .collect();

    Ok(Json(bookings))
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub carwash_id: Uuid,
    pub date: NaiveDate,
    pub windows: Vec<SlotWindow>,
}

async fn availability(
    State(state): State<Arc<AppState>>,
    Path(carwash_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let carwash = state
        .carwashes
        .get(&carwash_id)
        .ok_or_else(|| AppError::NotFound(format!("carwash {carwash_id} not found")))?
        .clone();

    let open = query
        .date
        .and_hms_opt(carwash.open_hour, 0, 0)
        .ok_or_else(|| AppError::BadRequest("invalid opening hour".to_string()))?;
    let close = query
        .date
        .and_hms_opt(carwash.close_hour, 0, 0)
        .ok_or_else(|| AppError::BadRequest("invalid closing hour".to_string()))?;

    let windows = state.slot_index.availability(
        carwash.id,
        Utc.from_utc_datetime(&open),
        Utc.from_utc_datetime(&close),
        carwash.slot_minutes,
        carwash.max_cars_per_slot,
    );

    Ok(Json(AvailabilityResponse {
        carwash_id,
        date: query.date,
        windows,
    }))
}
