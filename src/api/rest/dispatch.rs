use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::ActorContext;
use crate::engine::dispatch;
use crate::error::AppError;
use crate::models::assignment::WorkerAssignment;
use crate::models::carwash::Carwash;
use crate::models::worker::{GeoPoint, Worker, WorkerStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/carwashes", post(create_carwash).get(list_carwashes))
        .route("/carwashes/:id", get(get_carwash))
        .route("/carwashes/:id/workers", get(list_workers))
        .route("/workers", post(create_worker))
        .route("/workers/:id/status", patch(update_worker_status))
        .route("/bookings/:id/assign", post(assign_worker))
        .route("/bookings/:id/reassign", post(reassign_worker))
}

#[derive(Deserialize)]
pub struct CreateCarwashRequest {
    pub name: String,
    pub location: GeoPoint,
    pub max_cars_per_slot: u32,
    pub slot_minutes: Option<u32>,
    pub open_hour: Option<u32>,
    pub close_hour: Option<u32>,
    pub service_radius_km: f64,
}

async fn create_carwash(
    State(state): State<Arc<AppState>>,
    ActorContext(_actor): ActorContext,
    Json(payload): Json<CreateCarwashRequest>,
) -> Result<Json<Carwash>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.max_cars_per_slot == 0 {
        return Err(AppError::BadRequest(
            "max_cars_per_slot must be > 0".to_string(),
        ));
    }

    let slot_minutes = payload.slot_minutes.unwrap_or(30);
    if slot_minutes == 0 {
        return Err(AppError::BadRequest("slot_minutes must be > 0".to_string()));
    }

    let open_hour = payload.open_hour.unwrap_or(9);
    let close_hour = payload.close_hour.unwrap_or(18);
    if open_hour >= close_hour || close_hour > 23 {
        return Err(AppError::BadRequest(
            "opening hours must satisfy open_hour < close_hour <= 23".to_string(),
        ));
    }

    let carwash = Carwash {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        max_cars_per_slot: payload.max_cars_per_slot,
        slot_minutes,
        open_hour,
        close_hour,
        service_radius_km: payload.service_radius_km.max(0.0),
        created_at: Utc::now(),
    };

    state.carwashes.insert(carwash.id, carwash.clone());
    Ok(Json(carwash))
}

async fn list_carwashes(State(state): State<Arc<AppState>>) -> Json<Vec<Carwash>> {
    let carwashes = state
        .carwashes
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(carwashes)
}

async fn get_carwash(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Carwash>, AppError> {
    let carwash = state
        .carwashes
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("carwash {id} not found")))?;

    Ok(Json(carwash.value().clone()))
}

#[derive(Deserialize)]
pub struct CreateWorkerRequest {
    pub carwash_id: Uuid,
    pub name: String,
}

async fn create_worker(
    State(state): State<Arc<AppState>>,
    ActorContext(_actor): ActorContext,
    Json(payload): Json<CreateWorkerRequest>,
) -> Result<Json<Worker>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if !state.carwashes.contains_key(&payload.carwash_id) {
        return Err(AppError::NotFound(format!(
            "carwash {} not found",
            payload.carwash_id
        )));
    }

    let now = Utc::now();
    let worker = Worker {
        id: Uuid::new_v4(),
        carwash_id: payload.carwash_id,
        name: payload.name,
        status: WorkerStatus::Offline,
        created_at: now,
        updated_at: now,
    };

    state.workers.insert(worker.id, worker.clone());
    Ok(Json(worker))
}

#[derive(Deserialize)]
pub struct UpdateWorkerStatusRequest {
    pub status: WorkerStatus,
}

async fn update_worker_status(
    State(state): State<Arc<AppState>>,
    ActorContext(_actor): ActorContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateWorkerStatusRequest>,
) -> Result<Json<Worker>, AppError> {
    let mut worker = state
        .workers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("worker {id} not found")))?;

    worker.status = payload.status;
    worker.updated_at = Utc::now();

    Ok(Json(worker.clone()))
}

#[derive(Deserialize)]
pub struct ListWorkersQuery {
    pub status: Option<WorkerStatus>,
}

/// The owner's assignment pool: workers of one carwash, optionally narrowed
/// to those currently online.
async fn list_workers(
    State(state): State<Arc<AppState>>,
    Path(carwash_id): Path<Uuid>,
    Query(query): Query<ListWorkersQuery>,
) -> Result<Json<Vec<Worker>>, AppError> {
    if !state.carwashes.contains_key(&carwash_id) {
        return Err(AppError::NotFound(format!("carwash {carwash_id} not found")));
    }

    let workers = state
        .workers
        .iter()
        .filter(|entry| {
            let worker = entry.value();
            worker.carwash_id == carwash_id
                && query.status.map_or(true, |status| worker.status == status)
        })
        .map(|entry| entry.value().clone())
        .collect();

    Ok(Json(workers))
}

#[derive(Deserialize)]
pub struct AssignWorkerRequest {
    pub worker_id: Uuid,
}

async fn assign_worker(
    State(state): State<Arc<AppState>>,
    ActorContext(actor): ActorContext,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<AssignWorkerRequest>,
) -> Result<Json<WorkerAssignment>, AppError> {
    let assignment = dispatch::assign_worker(&state, booking_id, payload.worker_id, actor)?;
    Ok(Json(assignment))
}

async fn reassign_worker(
    State(state): State<Arc<AppState>>,
    ActorContext(actor): ActorContext,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<AssignWorkerRequest>,
) -> Result<Json<WorkerAssignment>, AppError> {
    let assignment = dispatch::reassign_worker(&state, booking_id, payload.worker_id, actor)?;
    Ok(Json(assignment))
}
