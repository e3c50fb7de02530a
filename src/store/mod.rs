//! Query interface to the hosted row store.
//!
//! The controller never locks in-process to settle cross-driver races: every
//! state change goes through [`RideStore::update_ride`], which applies a patch
//! only while the row still matches its [`RideGuard`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::driver::{Availability, Driver};
use crate::models::fare::{FareBreakdown, FareRule};
use crate::models::notification::{DeclineMarker, Notification, NotificationStatus};
use crate::models::ride::{BookingCategory, GeoPoint, Ride, RideStatus, VehicleClass};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Rides,
    Drivers,
    Notifications,
    Declines,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Row-change event delivered to subscribers after every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row_id: Uuid,
    /// Driver the row belongs to, when it has one.
    pub driver_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverGuard {
    Any,
    Unassigned,
    Is(Uuid),
}

/// Equality guard evaluated against the row at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct RideGuard {
    pub statuses: Vec<RideStatus>,
    pub driver: DriverGuard,
    pub pickup_otp: Option<String>,
    pub drop_otp: Option<String>,
}

impl RideGuard {
    pub fn status(status: RideStatus) -> Self {
        Self::statuses(&[status])
    }

    pub fn statuses(statuses: &[RideStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            driver: DriverGuard::Any,
            pickup_otp: None,
            drop_otp: None,
        }
    }

    pub fn unassigned(mut self) -> Self {
        self.driver = DriverGuard::Unassigned;
        self
    }

    pub fn driver(mut self, driver_id: Uuid) -> Self {
        self.driver = DriverGuard::Is(driver_id);
        self
    }

    pub fn pickup_otp(mut self, code: impl Into<String>) -> Self {
        self.pickup_otp = Some(code.into());
        self
    }

    pub fn drop_otp(mut self, code: impl Into<String>) -> Self {
        self.drop_otp = Some(code.into());
        self
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&ride.status) {
            return false;
        }

        let driver_ok = match self.driver {
            DriverGuard::Any => true,
            DriverGuard::Unassigned => ride.driver_id.is_none(),
            DriverGuard::Is(id) => ride.driver_id == Some(id),
        };
        if !driver_ok {
            return false;
        }

        if let Some(expected) = &self.pickup_otp {
            if ride.pickup_otp.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.drop_otp {
            if ride.drop_otp.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }

        true
    }
}

/// Column writes for a ride row. `None` leaves a column untouched; nullable
/// columns take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RidePatch {
    pub status: Option<RideStatus>,
    pub driver_id: Option<Option<Uuid>>,
    pub pickup_otp: Option<Option<String>>,
    pub drop_otp: Option<Option<String>>,
    pub fare: Option<Option<FareBreakdown>>,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<u32>,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_start_location: Option<GeoPoint>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RidePatch {
    pub fn apply(self, ride: &mut Ride) {
        if let Some(status) = self.status {
            ride.status = status;
        }
        if let Some(driver_id) = self.driver_id {
            ride.driver_id = driver_id;
        }
        if let Some(code) = self.pickup_otp {
            ride.pickup_otp = code;
        }
        if let Some(code) = self.drop_otp {
            ride.drop_otp = code;
        }
        if let Some(fare) = self.fare {
            ride.fare_amount = fare.as_ref().map(|breakdown| breakdown.total_fare);
            ride.fare_breakdown = fare;
        }
        if let Some(distance) = self.distance_km {
            ride.distance_km = Some(distance);
        }
        if let Some(minutes) = self.duration_minutes {
            ride.duration_minutes = Some(minutes);
        }
        if let Some(started_at) = self.trip_started_at {
            ride.trip_started_at = Some(started_at);
        }
        if let Some(location) = self.trip_start_location {
            ride.trip_start_location = Some(location);
        }
        if let Some(reason) = self.cancellation_reason {
            ride.cancellation_reason = Some(reason);
        }
        if let Some(cancelled_by) = self.cancelled_by {
            ride.cancelled_by = Some(cancelled_by);
        }
        if let Some(accepted_at) = self.accepted_at {
            ride.accepted_at = Some(accepted_at);
        }
        if let Some(completed_at) = self.completed_at {
            ride.completed_at = Some(completed_at);
        }
        ride.updated_at = Utc::now();
    }
}

/// Read filter for rides. Results are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideQuery {
    pub ids: Option<Vec<Uuid>>,
    pub driver_id: Option<Uuid>,
    pub unassigned_only: bool,
    pub statuses: Vec<RideStatus>,
    pub limit: Option<usize>,
}

impl RideQuery {
    pub fn matches(&self, ride: &Ride) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&ride.id) {
                return false;
            }
        }
        if let Some(driver_id) = self.driver_id {
            if ride.driver_id != Some(driver_id) {
                return false;
            }
        }
        if self.unassigned_only && ride.driver_id.is_some() {
            return false;
        }
        self.statuses.is_empty() || self.statuses.contains(&ride.status)
    }
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn get_ride(&self, ride_id: Uuid) -> StoreResult<Option<Ride>>;

    async fn query_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>>;

    async fn insert_ride(&self, ride: Ride) -> StoreResult<Ride>;

    /// Applies `patch` only if the row currently satisfies `guard`.
    /// `Ok(None)` means zero rows affected.
    async fn update_ride(
        &self,
        ride_id: Uuid,
        guard: &RideGuard,
        patch: RidePatch,
    ) -> StoreResult<Option<Ride>>;

    async fn get_driver(&self, driver_id: Uuid) -> StoreResult<Option<Driver>>;

    async fn list_drivers(&self) -> StoreResult<Vec<Driver>>;

    async fn upsert_driver(&self, driver: Driver) -> StoreResult<Driver>;

    async fn set_driver_availability(
        &self,
        driver_id: Uuid,
        availability: Availability,
    ) -> StoreResult<Option<Driver>>;

    async fn set_driver_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> StoreResult<Option<Driver>>;

    async fn get_fare_rule(
        &self,
        category: BookingCategory,
        vehicle_class: VehicleClass,
    ) -> StoreResult<Option<FareRule>>;

    async fn upsert_fare_rule(&self, rule: FareRule) -> StoreResult<FareRule>;

    async fn insert_notification(&self, notification: Notification) -> StoreResult<Notification>;

    async fn notifications_for(
        &self,
        driver_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<Vec<Notification>>;

    /// Sets the status of every notification for (driver, ride). Returns rows affected.
    async fn mark_notifications(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<usize>;

    async fn upsert_decline(&self, marker: DeclineMarker) -> StoreResult<DeclineMarker>;

    async fn declines_for(&self, driver_id: Uuid) -> StoreResult<Vec<DeclineMarker>>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{RideGuard, RidePatch, RideQuery};
    use crate::models::ride::{BookingCategory, GeoPoint, Ride, RideStatus, VehicleClass};

    fn ride() -> Ride {
        let point = GeoPoint { lat: 12.97, lng: 77.59 };
        Ride::new_request(
            Uuid::new_v4(),
            BookingCategory::Regular,
            VehicleClass::Mini,
            (point, "MG Road".to_string()),
            (point, "Indiranagar".to_string()),
        )
    }

    #[test]
    fn unassigned_guard_rejects_claimed_ride() {
        let mut ride = ride();
        let guard = RideGuard::status(RideStatus::Requested).unassigned();
        assert!(guard.matches(&ride));

        ride.driver_id = Some(Uuid::new_v4());
        assert!(!guard.matches(&ride));
    }

    #[test]
    fn otp_guard_requires_stored_code() {
        let mut ride = ride();
        ride.status = RideStatus::DriverArrived;
        let guard = RideGuard::status(RideStatus::DriverArrived).pickup_otp("4321");
        assert!(!guard.matches(&ride));

        ride.pickup_otp = Some("4321".to_string());
        assert!(guard.matches(&ride));
    }

    #[test]
    fn patch_clears_nullable_columns() {
        let mut ride = ride();
        ride.drop_otp = Some("1111".to_string());
        RidePatch {
            status: Some(RideStatus::Completed),
            drop_otp: Some(None),
            ..RidePatch::default()
        }
        .apply(&mut ride);

        assert_eq!(ride.status, RideStatus::Completed);
        assert!(ride.drop_otp.is_none());
    }

    #[test]
    fn query_filters_by_driver_and_status() {
        let driver = Uuid::new_v4();
        let mut mine = ride();
        mine.driver_id = Some(driver);
        mine.status = RideStatus::Accepted;

        let query = RideQuery {
            driver_id: Some(driver),
            statuses: RideStatus::ACTIVE.to_vec(),
            ..RideQuery::default()
        };
        assert!(query.matches(&mine));
        assert!(!query.matches(&ride()));
    }
}
