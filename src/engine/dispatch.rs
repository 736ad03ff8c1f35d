use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::{AssignmentStatus, WorkerAssignment};
use crate::models::booking::{Booking, BookingEvent, BookingEventKind, BookingKind, BookingStatus};
use crate::models::worker::{ActorRef, WorkerStatus};
use crate::state::AppState;

/// Assigns a worker to a confirmed home-service booking. Assignment is
/// owner-driven: the caller picks from the online-worker list, the
/// coordinator only enforces the exclusivity and state preconditions.
pub fn assign_worker(
    state: &AppState,
    booking_id: Uuid,
    worker_id: Uuid,
    actor: ActorRef,
) -> Result<WorkerAssignment, AppError> {
    let mut entry = state
        .bookings
        .get_mut(&booking_id)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    let booking = entry.value_mut();

    check_assignable(state, booking, worker_id)?;

    let BookingKind::Home {
        worker_id: assigned,
        ..
    } = &mut booking.kind
    else {
        return Err(AppError::PreconditionFailed(
            "slot bookings are not dispatched".to_string(),
        ));
    };

    if assigned.is_some() {
        return Err(AppError::PreconditionFailed(
            "booking already has a worker; use reassign".to_string(),
        ));
    }

    claim_worker(state, worker_id, booking_id)?;
    *assigned = Some(worker_id);
    booking.version += 1;
    booking.updated_at = Utc::now();

    let assignment = WorkerAssignment {
        booking_id,
        worker_id,
        assigned_at: Utc::now(),
        status: AssignmentStatus::Active,
    };
    state.assignments.insert(booking_id, assignment.clone());

    let _ = state.booking_events_tx.send(BookingEvent {
        booking_id,
        actor,
        at: Utc::now(),
        kind: BookingEventKind::WorkerAssigned { worker_id },
    });
    tracing::info!(booking_id = %booking_id, worker_id = %worker_id, "worker assigned");

    Ok(assignment)
}

/// Swaps the assigned worker. Only legal while the booking is still
/// confirmed; any tracking session left over from a stale handle is closed.
pub fn reassign_worker(
    state: &AppState,
    booking_id: Uuid,
    new_worker_id: Uuid,
    actor: ActorRef,
) -> Result<WorkerAssignment, AppError> {
    let mut entry = state
        .bookings
        .get_mut(&booking_id)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;
    let booking = entry.value_mut();

    check_assignable(state, booking, new_worker_id)?;

    let BookingKind::Home {
        worker_id: assigned,
        ..
    } = &mut booking.kind
    else {
        return Err(AppError::PreconditionFailed(
            "slot bookings are not dispatched".to_string(),
        ));
    };

    let old_worker_id = assigned.ok_or_else(|| {
        AppError::PreconditionFailed("booking has no worker to replace".to_string())
    })?;
    if old_worker_id == new_worker_id {
        return Err(AppError::PreconditionFailed(
            "worker is already assigned to this booking".to_string(),
        ));
    }

    claim_worker(state, new_worker_id, booking_id)?;
    state.active_by_worker.remove(&old_worker_id);
    state.tracking.close(booking_id);

    *assigned = Some(new_worker_id);
    booking.version += 1;
    booking.updated_at = Utc::now();

    let assignment = WorkerAssignment {
        booking_id,
        worker_id: new_worker_id,
        assigned_at: Utc::now(),
        status: AssignmentStatus::Active,
    };
    state.assignments.insert(booking_id, assignment.clone());

    let _ = state.booking_events_tx.send(BookingEvent {
        booking_id,
        actor,
        at: Utc::now(),
        kind: BookingEventKind::WorkerReassigned {
            old_worker_id,
            new_worker_id,
        },
    });
    tracing::info!(
        booking_id = %booking_id,
        old_worker_id = %old_worker_id,
        new_worker_id = %new_worker_id,
        "worker reassigned"
    );

    Ok(assignment)
}

fn check_assignable(state: &AppState, booking: &Booking, worker_id: Uuid) -> Result<(), AppError> {
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::PreconditionFailed(format!(
            "workers can only be assigned to confirmed bookings, booking is {:?}",
            booking.status
        )));
    }

    let worker = state
        .workers
        .get(&worker_id)
        .ok_or_else(|| AppError::NotFound(format!("worker {worker_id} not found")))?;

    if worker.carwash_id != booking.carwash_id {
        return Err(AppError::BadRequest(
            "worker belongs to a different carwash".to_string(),
        ));
    }
    if worker.status != WorkerStatus::Online {
        return Err(AppError::PreconditionFailed(
            "worker is offline".to_string(),
        ));
    }

    Ok(())
}

/// Atomically claims the worker for this booking via the entry lock on the
/// active-by-worker index.
fn claim_worker(state: &AppState, worker_id: Uuid, booking_id: Uuid) -> Result<(), AppError> {
    match state.active_by_worker.entry(worker_id) {
        dashmap::mapref::entry::Entry::Occupied(current) => {
            Err(AppError::AssignmentConflict(format!(
                "worker {worker_id} is already on booking {}",
                current.get()
            )))
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(booking_id);
            Ok(())
        }
    }
}
