use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ride::{GeoPoint, VehicleClass};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Offline,
    Online,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverProfile {
    pub full_name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub registration: String,
    pub vehicle_class: VehicleClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub id: Uuid,
    pub user_id: Uuid,
    pub profile: DriverProfile,
    pub vehicle: Option<Vehicle>,
    pub availability: Availability,
    pub verified: bool,
    pub location: Option<GeoPoint>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    /// Names of the profile fields a driver must fill in before taking rides.
    pub fn missing_profile_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.profile.full_name.trim().is_empty() {
            missing.push("name");
        }
        if self.profile.phone.trim().is_empty() {
            missing.push("phone");
        }

        match &self.vehicle {
            None => missing.push("vehicle"),
            Some(vehicle) => {
                if vehicle.make.trim().is_empty() {
                    missing.push("vehicle make");
                }
                if vehicle.model.trim().is_empty() {
                    missing.push("vehicle model");
                }
                if vehicle.registration.trim().is_empty() {
                    missing.push("vehicle registration");
                }
            }
        }

        missing
    }

    pub fn vehicle_class(&self) -> Option<VehicleClass> {
        self.vehicle.as_ref().map(|vehicle| vehicle.vehicle_class)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Availability, Driver, DriverProfile, Vehicle};
    use crate::models::ride::VehicleClass;

    fn driver(name: &str, phone: &str, vehicle: Option<Vehicle>) -> Driver {
        Driver {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            profile: DriverProfile {
                full_name: name.to_string(),
                phone: phone.to_string(),
            },
            vehicle,
            availability: Availability::Online,
            verified: true,
            location: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn complete_profile_has_no_missing_fields() {
        let vehicle = Vehicle {
            make: "Maruti".to_string(),
            model: "Dzire".to_string(),
            registration: "KA01AB1234".to_string(),
            vehicle_class: VehicleClass::Sedan,
        };
        assert!(driver("Ravi", "+911234567890", Some(vehicle)).missing_profile_fields().is_empty());
    }

    #[test]
    fn blank_fields_and_missing_vehicle_are_reported() {
        let missing = driver(" ", "", None).missing_profile_fields();
        assert_eq!(missing, vec!["name", "phone", "vehicle"]);
    }

    #[test]
    fn partial_vehicle_is_reported_per_field() {
        let vehicle = Vehicle {
            make: "Bajaj".to_string(),
            model: String::new(),
            registration: String::new(),
            vehicle_class: VehicleClass::Auto,
        };
        let missing = driver("Asha", "98450", Some(vehicle)).missing_profile_fields();
        assert_eq!(missing, vec!["vehicle model", "vehicle registration"]);
    }
}
