use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::worker::GeoPoint;

/// Scheduling and dispatch configuration for one station. Profile data
/// (photos, descriptions, reviews) lives outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Carwash {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub max_cars_per_slot: u32,
    pub slot_minutes: u32,
    pub open_hour: u32,
    pub close_hour: u32,
    pub service_radius_km: f64,
    pub created_at: DateTime<Utc>,
}
