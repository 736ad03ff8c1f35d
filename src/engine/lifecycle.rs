use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::tracking::SessionHandle;
use crate::error::AppError;
use crate::geo;
use crate::models::assignment::AssignmentStatus;
use crate::models::booking::{
    Booking, BookingEvent, BookingEventKind, BookingKind, BookingStatus, CancellationRecord,
    CancellationStage,
};
use crate::models::worker::{ActorRef, GeoPoint};
use crate::state::AppState;

/// Parameters for a new booking. The tagged kind keeps home-service-only
/// fields unrepresentable on slot requests.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub customer_id: Uuid,
    pub car_id: Uuid,
    pub carwash_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub total_amount: f64,
    #[serde(flatten)]
    pub kind: NewBookingKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "booking_type", rename_all = "snake_case")]
pub enum NewBookingKind {
    Slot,
    Home {
        location: GeoPoint,
        address_note: Option<String>,
    },
}

/// Outcome of a committed transition. `tracking_session` carries the
/// producer handle back to the worker device when a trip starts.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionResult {
    #[serde(flatten)]
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_session: Option<Uuid>,
}

pub fn create_booking(
    state: &AppState,
    params: NewBooking,
    actor: ActorRef,
) -> Result<Booking, AppError> {
    let carwash = state
        .carwashes
        .get(&params.carwash_id)
        .ok_or_else(|| AppError::NotFound(format!("carwash {} not found", params.carwash_id)))?
        .clone();

    let now = Utc::now();
    if params.scheduled_at < now {
        return Err(AppError::BadRequest(
            "scheduled time is in the past".to_string(),
        ));
    }

    let kind = match params.kind {
        NewBookingKind::Slot => {
            let window_end =
                params.scheduled_at + Duration::minutes(i64::from(carwash.slot_minutes));
            let reservation = state
                .slot_index
                .try_reserve(
                    carwash.id,
                    params.scheduled_at,
                    window_end,
                    carwash.slot_minutes,
                    carwash.max_cars_per_slot,
                )
                .inspect_err(|_| state.metrics.capacity_rejections_total.inc())?;

            BookingKind::Slot {
                reservation_id: Some(reservation.id),
            }
        }
        NewBookingKind::Home {
            location,
            address_note,
        } => {
            if !geo::within_radius_km(&carwash.location, &location, carwash.service_radius_km) {
                return Err(AppError::BadRequest(format!(
                    "address is outside the {:.1} km service radius",
                    carwash.service_radius_km
                )));
            }

            BookingKind::Home {
                location,
                address_note,
                worker_id: None,
            }
        }
    };

    let booking = Booking {
        id: Uuid::new_v4(),
        customer_id: params.customer_id,
        car_id: params.car_id,
        carwash_id: carwash.id,
        scheduled_at: params.scheduled_at,
        status: BookingStatus::Pending,
        notes: params.notes,
        total_amount: params.total_amount,
        version: 1,
        cancelled: None,
        kind,
        created_at: now,
        updated_at: now,
    };

    state.bookings.insert(booking.id, booking.clone());
    state
        .metrics
        .bookings_total
        .with_label_values(&[booking_type_label(&booking.kind)])
        .inc();
    state.metrics.slots_occupied.set(state.slot_index.total_occupied() as i64);

    emit(state, &booking, actor, BookingEventKind::Created);
    tracing::info!(
        booking_id = %booking.id,
        carwash_id = %booking.carwash_id,
        booking_type = booking_type_label(&booking.kind),
        "booking created"
    );

    Ok(booking)
}

/// The single authoritative transition function. The bookings map entry
/// guard serializes concurrent attempts per booking; `expected_version`
/// additionally lets callers detect that they acted on stale state.
pub fn transition(
    state: &AppState,
    booking_id: Uuid,
    target: BookingStatus,
    verification_code: Option<&str>,
    expected_version: Option<u64>,
    actor: ActorRef,
) -> Result<TransitionResult, AppError> {
    let timer = std::time::Instant::now();

    let mut entry = state
        .bookings
        .get_mut(&booking_id)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    let booking = entry.value_mut();

    if let Some(version) = expected_version {
        if version != booking.version {
            state.record_transition(timer, "conflict");
            return Err(AppError::StateConflict(format!(
                "booking {booking_id} is at version {}, caller expected {version}",
                booking.version
            )));
        }
    }

    let from = booking.status;
    let outcome = apply(state, booking, target, verification_code, actor);

    match outcome {
        Ok(mut result) => {
            booking.version += 1;
            booking.updated_at = Utc::now();
            result.booking = booking.clone();

            emit(
                state,
                booking,
                actor,
                BookingEventKind::StatusChanged {
                    from,
                    to: booking.status,
                },
            );
            state.record_transition(timer, "success");
            tracing::info!(
                booking_id = %booking.id,
                from = ?from,
                to = ?booking.status,
                actor_id = %actor.id,
                "booking transitioned"
            );
            Ok(result)
        }
        Err(err) => {
            state.record_transition(timer, err.outcome_label());
            Err(err)
        }
    }
}

/// Validates the edge and runs its side effects. The booking is only
/// mutated on edges that commit; every rejected edge leaves it untouched.
fn apply(
    state: &AppState,
    booking: &mut Booking,
    target: BookingStatus,
    verification_code: Option<&str>,
    actor: ActorRef,
) -> Result<TransitionResult, AppError> {
    use BookingStatus::{Cancelled, Completed, Confirmed, EnRoute, Pending};

    match (booking.status, target) {
        (Pending, Confirmed) => {
            let code = booking
                .kind
                .is_home()
                .then(|| state.handshake.generate(booking.id));
            booking.status = Confirmed;
            Ok(result(booking, code, None))
        }

        (Pending | Confirmed | EnRoute, Cancelled) => {
            let stage = if booking.status == EnRoute {
                CancellationStage::EnRoute
            } else {
                CancellationStage::BeforeDispatch
            };

            release_resources(state, booking);
            booking.status = Cancelled;
            booking.cancelled = Some(CancellationRecord {
                stage,
                by: actor,
                at: Utc::now(),
            });

            emit(state, booking, actor, BookingEventKind::Cancelled { stage });
            Ok(result(booking, None, None))
        }

        (Confirmed, EnRoute) => {
            let BookingKind::Home { worker_id, .. } = &booking.kind else {
                return Err(AppError::PreconditionFailed(
                    "slot bookings have no dispatch phase".to_string(),
                ));
            };
            let worker_id = worker_id.ok_or_else(|| {
                AppError::PreconditionFailed(
                    "cannot start trip before a worker is assigned".to_string(),
                )
            })?;

            let handle = state.tracking.open(booking.id, worker_id);
            state
                .metrics
                .tracking_sessions_active
                .set(state.tracking.active_sessions() as i64);
            booking.status = EnRoute;
            Ok(result(booking, None, Some(handle)))
        }

        (Confirmed, Completed) => {
            if booking.kind.is_home() {
                return Err(AppError::PreconditionFailed(
                    "home-service bookings complete on verified arrival".to_string(),
                ));
            }
            booking.status = Completed;
            Ok(result(booking, None, None))
        }

        (EnRoute, Completed) => {
            let supplied = verification_code.ok_or(AppError::InvalidVerificationCode)?;
            if !state.handshake.validate(booking.id, supplied) {
                return Err(AppError::InvalidVerificationCode);
            }

            state.handshake.consume(booking.id);
            state.tracking.close(booking.id);
            state
                .metrics
                .tracking_sessions_active
                .set(state.tracking.active_sessions() as i64);
            finish_assignment(state, booking.id, AssignmentStatus::Completed);

            booking.status = Completed;
            Ok(result(booking, None, None))
        }

        // A duplicate of an already-applied transition lost a race; the
        // caller should refetch rather than treat it as an illegal edge.
        (current, requested) if current == requested => Err(AppError::StateConflict(format!(
            "booking is already {}",
            status_label(current)
        ))),

        (current, requested) => Err(AppError::PreconditionFailed(format!(
            "cannot move a {} booking to {}",
            status_label(current),
            status_label(requested)
        ))),
    }
}

/// Releases everything a booking may hold. Each release is idempotent, so
/// racing cancellation paths cannot double-free.
fn release_resources(state: &AppState, booking: &Booking) {
    match &booking.kind {
        BookingKind::Slot { reservation_id } => {
            if let Some(reservation_id) = reservation_id {
                state.slot_index.release(*reservation_id);
                state
                    .metrics
                    .slots_occupied
                    .set(state.slot_index.total_occupied() as i64);
            }
        }
        BookingKind::Home { .. } => {
            state.handshake.consume(booking.id);
            state.tracking.close(booking.id);
            state
                .metrics
                .tracking_sessions_active
                .set(state.tracking.active_sessions() as i64);
            finish_assignment(state, booking.id, AssignmentStatus::Cancelled);
        }
    }
}

fn finish_assignment(state: &AppState, booking_id: Uuid, status: AssignmentStatus) {
    if let Some(mut assignment) = state.assignments.get_mut(&booking_id) {
        if assignment.status == AssignmentStatus::Active {
            assignment.status = status;
            state.active_by_worker.remove(&assignment.worker_id);
        }
    }
}

fn result(
    booking: &Booking,
    verification_code: Option<String>,
    handle: Option<SessionHandle>,
) -> TransitionResult {
    TransitionResult {
        booking: booking.clone(),
        verification_code,
        tracking_session: handle.map(|h| h.session),
    }
}

fn emit(state: &AppState, booking: &Booking, actor: ActorRef, kind: BookingEventKind) {
    let _ = state.booking_events_tx.send(BookingEvent {
        booking_id: booking.id,
        actor,
        at: Utc::now(),
        kind,
    });
}

pub fn booking_type_label(kind: &BookingKind) -> &'static str {
    match kind {
        BookingKind::Slot { .. } => "slot",
        BookingKind::Home { .. } => "home",
    }
}

fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pending",
        BookingStatus::Confirmed => "confirmed",
        BookingStatus::EnRoute => "en_route",
        BookingStatus::Completed => "completed",
        BookingStatus::Cancelled => "cancelled",
    }
}
