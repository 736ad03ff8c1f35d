use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Cancelled,
}

/// Ties a home-service booking to its worker for the duration of the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub booking_id: Uuid,
    pub worker_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub status: AssignmentStatus,
}
