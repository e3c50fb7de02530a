use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::fare::FareBreakdown;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingCategory {
    Regular,
    Rental,
    Outstation,
    Airport,
}

impl fmt::Display for BookingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingCategory::Regular => "regular",
            BookingCategory::Rental => "rental",
            BookingCategory::Outstation => "outstation",
            BookingCategory::Airport => "airport",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Bike,
    Auto,
    Mini,
    Sedan,
    Suv,
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VehicleClass::Bike => "bike",
            VehicleClass::Auto => "auto",
            VehicleClass::Mini => "mini",
            VehicleClass::Sedan => "sedan",
            VehicleClass::Suv => "suv",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Accepted,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    /// Statuses in which a driver holds the ride.
    pub const ACTIVE: [RideStatus; 3] = [
        RideStatus::Accepted,
        RideStatus::DriverArrived,
        RideStatus::InProgress,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::DriverArrived => "driver_arrived",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub category: BookingCategory,
    pub vehicle_class: VehicleClass,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub destination: GeoPoint,
    pub destination_address: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Booked package length, rental bookings only.
    pub rental_hours: Option<u32>,
    pub pickup_otp: Option<String>,
    pub drop_otp: Option<String>,
    pub status: RideStatus,
    pub fare_amount: Option<f64>,
    pub fare_breakdown: Option<FareBreakdown>,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<u32>,
    pub trip_started_at: Option<DateTime<Utc>>,
    pub trip_start_location: Option<GeoPoint>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn new_request(
        customer_id: Uuid,
        category: BookingCategory,
        vehicle_class: VehicleClass,
        pickup: (GeoPoint, String),
        destination: (GeoPoint, String),
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_id,
            driver_id: None,
            category,
            vehicle_class,
            pickup: pickup.0,
            pickup_address: pickup.1,
            destination: destination.0,
            destination_address: destination.1,
            scheduled_at: None,
            rental_hours: None,
            pickup_otp: None,
            drop_otp: None,
            status: RideStatus::Requested,
            fare_amount: None,
            fare_breakdown: None,
            distance_km: None,
            duration_minutes: None,
            trip_started_at: None,
            trip_start_location: None,
            cancellation_reason: None,
            cancelled_by: None,
            accepted_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open_offer(&self) -> bool {
        self.status == RideStatus::Requested && self.driver_id.is_none()
    }
}
