use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::worker::{ActorRef, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    EnRoute,
    Completed,
    Cancelled,
}

/// Booking-type-specific payload. Home-only fields are unrepresentable on a
/// slot booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "booking_type", rename_all = "snake_case")]
pub enum BookingKind {
    Slot {
        reservation_id: Option<Uuid>,
    },
    Home {
        location: GeoPoint,
        address_note: Option<String>,
        worker_id: Option<Uuid>,
    },
}

impl BookingKind {
    pub fn is_home(&self) -> bool {
        matches!(self, BookingKind::Home { .. })
    }

    pub fn worker_id(&self) -> Option<Uuid> {
        match self {
            BookingKind::Home { worker_id, .. } => *worker_id,
            BookingKind::Slot { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationStage {
    BeforeDispatch,
    EnRoute,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationRecord {
    pub stage: CancellationStage,
    pub by: ActorRef,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub car_id: Uuid,
    pub carwash_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub total_amount: f64,
    /// Bumped on every committed transition; stale writers are rejected.
    pub version: u64,
    pub cancelled: Option<CancellationRecord>,
    #[serde(flatten)]
    pub kind: BookingKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingEvent {
    pub booking_id: Uuid,
    pub actor: ActorRef,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: BookingEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookingEventKind {
    Created,
    StatusChanged {
        from: BookingStatus,
        to: BookingStatus,
    },
    WorkerAssigned {
        worker_id: Uuid,
    },
    WorkerReassigned {
        old_worker_id: Uuid,
        new_worker_id: Uuid,
    },
    Cancelled {
        stage: CancellationStage,
    },
}
