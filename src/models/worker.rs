use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum WorkerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub carwash_id: Uuid,
    pub name: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity of the actor performing an operation, supplied explicitly by the
/// caller. Nothing in the engine reads identity from ambient state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ActorRef {
    pub id: Uuid,
    pub role: ActorRole,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Owner,
    Worker,
}

impl std::str::FromStr for ActorRole {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(ActorRole::Customer),
            "owner" => Ok(ActorRole::Owner),
            "worker" => Ok(ActorRole::Worker),
            _ => Err(()),
        }
    }
}
