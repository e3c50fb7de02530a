use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
    Cancelled,
}

/// A ride offered to one driver. Only drives refresh; never authoritative ride state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub ride_id: Uuid,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn offer(driver_id: Uuid, ride_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver_id,
            ride_id,
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        }
    }
}

/// Persisted "never offer this ride to this driver again". Unique on (driver_id, ride_id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeclineMarker {
    pub driver_id: Uuid,
    pub ride_id: Uuid,
    pub declined_at: DateTime<Utc>,
}
