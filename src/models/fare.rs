use serde::{Deserialize, Serialize};

use crate::models::ride::{BookingCategory, VehicleClass};

fn unit_multiplier() -> f64 {
    1.0
}

/// Pricing parameters for one (category, vehicle class) pair.
///
/// Category-specific fields default to zero so a regular rule can be written
/// without them. `peak_multiplier` defaults to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FareRule {
    pub category: BookingCategory,
    pub vehicle_class: VehicleClass,
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub per_minute_rate: f64,
    #[serde(default)]
    pub platform_fee_percent: f64,
    #[serde(default)]
    pub minimum_fare: f64,

    // rental
    #[serde(default)]
    pub hourly_rate: f64,
    #[serde(default)]
    pub km_limit_per_hour: f64,
    #[serde(default)]
    pub overtime_rate: f64,
    #[serde(default)]
    pub extra_km_rate: f64,

    // rental + outstation
    #[serde(default)]
    pub driver_allowance: f64,

    // outstation
    #[serde(default)]
    pub night_charge_percent: f64,

    // airport
    #[serde(default)]
    pub airport_fee: f64,
    #[serde(default = "unit_multiplier")]
    pub peak_multiplier: f64,
}

impl FareRule {
    /// A rule with every optional component zeroed.
    pub fn flat(
        category: BookingCategory,
        vehicle_class: VehicleClass,
        base_fare: f64,
        per_km_rate: f64,
        per_minute_rate: f64,
    ) -> Self {
        Self {
            category,
            vehicle_class,
            base_fare,
            per_km_rate,
            per_minute_rate,
            platform_fee_percent: 0.0,
            minimum_fare: 0.0,
            hourly_rate: 0.0,
            km_limit_per_hour: 0.0,
            overtime_rate: 0.0,
            extra_km_rate: 0.0,
            driver_allowance: 0.0,
            night_charge_percent: 0.0,
            airport_fee: 0.0,
            peak_multiplier: 1.0,
        }
    }
}

/// Itemized fare returned on completion and stored on the ride.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FareBreakdown {
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub base_fare: f64,
    pub distance_fare: f64,
    pub time_fare: f64,
    pub package_fare: f64,
    pub overtime_hours: u32,
    pub overtime_fare: f64,
    pub extra_km: f64,
    pub extra_km_fare: f64,
    pub driver_allowance: f64,
    pub night_charge: f64,
    pub airport_fee: f64,
    pub peak_multiplier: f64,
    pub platform_fee: f64,
    pub minimum_fare_applied: bool,
    pub total_fare: f64,
}
