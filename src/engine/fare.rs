use chrono::{NaiveDateTime, Timelike};

use crate::models::fare::{FareBreakdown, FareRule};
use crate::models::ride::{BookingCategory, VehicleClass};

const NIGHT_START_HOUR: u32 = 22;
const NIGHT_END_HOUR: u32 = 6;
const MORNING_PEAK: (u32, u32) = (6, 10);
const EVENING_PEAK: (u32, u32) = (18, 22);

/// Trip metrics and booking parameters the fare is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct FareInput {
    pub category: BookingCategory,
    pub vehicle_class: VehicleClass,
    pub distance_km: f64,
    pub duration_minutes: u32,
    /// Completion time on the local clock.
    pub completed_at: NaiveDateTime,
    /// Booked package length; only read for rentals.
    pub booked_hours: u32,
}

pub fn calculate_fare(input: &FareInput, rule: &FareRule) -> FareBreakdown {
    let distance_km = non_negative(input.distance_km);

    let breakdown = match input.category {
        BookingCategory::Regular => regular_fare(distance_km, input.duration_minutes, rule),
        BookingCategory::Rental => rental_fare(
            distance_km,
            input.duration_minutes,
            input.booked_hours,
            rule,
        ),
        BookingCategory::Outstation => outstation_fare(distance_km, input.completed_at, rule),
        BookingCategory::Airport => airport_fare(distance_km, input.completed_at, rule),
    };

    FareBreakdown {
        distance_km: round_money(distance_km),
        duration_minutes: input.duration_minutes,
        ..breakdown
    }
}

pub fn is_night(at: NaiveDateTime) -> bool {
    let hour = at.hour();
    hour >= NIGHT_START_HOUR || hour < NIGHT_END_HOUR
}

pub fn is_peak(at: NaiveDateTime) -> bool {
    let hour = at.hour();
    (MORNING_PEAK.0..MORNING_PEAK.1).contains(&hour) || (EVENING_PEAK.0..EVENING_PEAK.1).contains(&hour)
}

fn regular_fare(distance_km: f64, duration_minutes: u32, rule: &FareRule) -> FareBreakdown {
    let base_fare = non_negative(rule.base_fare);
    let distance_fare = non_negative(distance_km * rule.per_km_rate);
    let time_fare = non_negative(duration_minutes as f64 * rule.per_minute_rate);
    let subtotal = base_fare + distance_fare + time_fare;
    let platform_fee = non_negative(subtotal * rule.platform_fee_percent / 100.0);

    let with_fee = subtotal + platform_fee;
    let minimum = non_negative(rule.minimum_fare);
    let minimum_fare_applied = with_fee < minimum;

    FareBreakdown {
        base_fare: round_money(base_fare),
        distance_fare: round_money(distance_fare),
        time_fare: round_money(time_fare),
        platform_fee: round_money(platform_fee),
        peak_multiplier: 1.0,
        minimum_fare_applied,
        total_fare: round_money(with_fee.max(minimum)),
        ..FareBreakdown::default()
    }
}

fn rental_fare(
    distance_km: f64,
    duration_minutes: u32,
    booked_hours: u32,
    rule: &FareRule,
) -> FareBreakdown {
    let base_fare = non_negative(rule.base_fare);
    let package_fare = non_negative(booked_hours as f64 * rule.hourly_rate);

    let used_hours = duration_minutes.div_ceil(60);
    let overtime_hours = used_hours.saturating_sub(booked_hours);
    let overtime_fare = non_negative(overtime_hours as f64 * rule.overtime_rate);

    let included_km = booked_hours as f64 * rule.km_limit_per_hour;
    let extra_km = non_negative(distance_km - included_km);
    let extra_km_fare = non_negative(extra_km * rule.extra_km_rate);

    let driver_allowance = non_negative(rule.driver_allowance);
    let total = base_fare + package_fare + overtime_fare + extra_km_fare + driver_allowance;

    FareBreakdown {
        base_fare: round_money(base_fare),
        package_fare: round_money(package_fare),
        overtime_hours,
        overtime_fare: round_money(overtime_fare),
        extra_km: round_money(extra_km),
        extra_km_fare: round_money(extra_km_fare),
        driver_allowance: round_money(driver_allowance),
        peak_multiplier: 1.0,
        total_fare: round_money(total),
        ..FareBreakdown::default()
    }
}

fn outstation_fare(distance_km: f64, completed_at: NaiveDateTime, rule: &FareRule) -> FareBreakdown {
    let base_fare = non_negative(rule.base_fare);
    let distance_fare = non_negative(distance_km * rule.per_km_rate);
    let driver_allowance = non_negative(rule.driver_allowance);

    let night_charge = if is_night(completed_at) {
        non_negative((base_fare + distance_fare) * rule.night_charge_percent / 100.0)
    } else {
        0.0
    };

    let total = base_fare + distance_fare + driver_allowance + night_charge;

    FareBreakdown {
        base_fare: round_money(base_fare),
        distance_fare: round_money(distance_fare),
        driver_allowance: round_money(driver_allowance),
        night_charge: round_money(night_charge),
        peak_multiplier: 1.0,
        total_fare: round_money(total),
        ..FareBreakdown::default()
    }
}

fn airport_fare(distance_km: f64, completed_at: NaiveDateTime, rule: &FareRule) -> FareBreakdown {
    let base_fare = non_negative(rule.base_fare);
    let distance_fare = non_negative(distance_km * rule.per_km_rate);
    let airport_fee = non_negative(rule.airport_fee);

    let peak_multiplier = if is_peak(completed_at) {
        non_negative(rule.peak_multiplier)
    } else {
        1.0
    };

    let total = (base_fare + distance_fare + airport_fee) * peak_multiplier;

    FareBreakdown {
        base_fare: round_money(base_fare),
        distance_fare: round_money(distance_fare),
        airport_fee: round_money(airport_fee),
        peak_multiplier,
        total_fare: round_money(total),
        ..FareBreakdown::default()
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{FareInput, calculate_fare, is_night, is_peak};
    use crate::models::fare::FareRule;
    use crate::models::ride::{BookingCategory, VehicleClass};

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .and_then(|date| date.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    fn input(category: BookingCategory, distance_km: f64, duration_minutes: u32) -> FareInput {
        FareInput {
            category,
            vehicle_class: VehicleClass::Sedan,
            distance_km,
            duration_minutes,
            completed_at: at(14, 0),
            booked_hours: 0,
        }
    }

    fn regular_rule() -> FareRule {
        FareRule {
            minimum_fare: 100.0,
            ..FareRule::flat(BookingCategory::Regular, VehicleClass::Sedan, 50.0, 10.0, 0.0)
        }
    }

    #[test]
    fn regular_fare_sums_components() {
        let fare = calculate_fare(&input(BookingCategory::Regular, 12.5, 30), &regular_rule());
        assert_eq!(fare.distance_fare, 125.0);
        assert_eq!(fare.total_fare, 175.0);
        assert!(!fare.minimum_fare_applied);
    }

    #[test]
    fn regular_fare_is_floored_at_minimum() {
        let fare = calculate_fare(&input(BookingCategory::Regular, 2.0, 5), &regular_rule());
        assert_eq!(fare.total_fare, 100.0);
        assert!(fare.minimum_fare_applied);
    }

    #[test]
    fn platform_fee_applies_before_minimum() {
        let rule = FareRule {
            platform_fee_percent: 10.0,
            ..FareRule::flat(BookingCategory::Regular, VehicleClass::Sedan, 40.0, 12.0, 1.5)
        };
        // subtotal = 40 + 120 + 30 = 190, fee = 19
        let fare = calculate_fare(&input(BookingCategory::Regular, 10.0, 20), &rule);
        assert_eq!(fare.time_fare, 30.0);
        assert_eq!(fare.platform_fee, 19.0);
        assert_eq!(fare.total_fare, 209.0);
    }

    #[test]
    fn rental_overtime_rounds_up_to_whole_hours() {
        let rule = FareRule {
            hourly_rate: 150.0,
            km_limit_per_hour: 10.0,
            overtime_rate: 200.0,
            extra_km_rate: 12.0,
            driver_allowance: 250.0,
            ..FareRule::flat(BookingCategory::Rental, VehicleClass::Sedan, 100.0, 0.0, 0.0)
        };
        let fare = calculate_fare(
            &FareInput {
                booked_hours: 4,
                ..input(BookingCategory::Rental, 45.0, 300)
            },
            &rule,
        );

        assert_eq!(fare.package_fare, 600.0);
        assert_eq!(fare.overtime_hours, 1);
        assert_eq!(fare.overtime_fare, 200.0);
        assert_eq!(fare.extra_km, 5.0);
        assert_eq!(fare.extra_km_fare, 60.0);
        assert_eq!(fare.total_fare, 100.0 + 600.0 + 200.0 + 60.0 + 250.0);
    }

    #[test]
    fn rental_within_package_has_no_overtime_or_extra_km() {
        let rule = FareRule {
            hourly_rate: 150.0,
            km_limit_per_hour: 10.0,
            overtime_rate: 200.0,
            extra_km_rate: 12.0,
            ..FareRule::flat(BookingCategory::Rental, VehicleClass::Sedan, 0.0, 0.0, 0.0)
        };
        let fare = calculate_fare(
            &FareInput {
                booked_hours: 4,
                ..input(BookingCategory::Rental, 30.0, 240)
            },
            &rule,
        );

        assert_eq!(fare.overtime_hours, 0);
        assert_eq!(fare.extra_km, 0.0);
        assert_eq!(fare.total_fare, 600.0);
    }

    #[test]
    fn outstation_night_surcharge_only_at_night() {
        let rule = FareRule {
            driver_allowance: 300.0,
            night_charge_percent: 20.0,
            ..FareRule::flat(BookingCategory::Outstation, VehicleClass::Suv, 500.0, 15.0, 0.0)
        };
        let day = calculate_fare(&input(BookingCategory::Outstation, 100.0, 180), &rule);
        let night = calculate_fare(
            &FareInput {
                completed_at: at(23, 30),
                ..input(BookingCategory::Outstation, 100.0, 180)
            },
            &rule,
        );

        assert_eq!(day.night_charge, 0.0);
        assert_eq!(day.total_fare, 2300.0);
        assert_eq!(night.night_charge, 400.0);
        assert_eq!(night.total_fare, 2700.0);
    }

    #[test]
    fn airport_peak_multiplier_applies_to_whole_fare() {
        let rule = FareRule {
            airport_fee: 100.0,
            peak_multiplier: 1.5,
            ..FareRule::flat(BookingCategory::Airport, VehicleClass::Sedan, 200.0, 20.0, 0.0)
        };
        let off_peak = calculate_fare(&input(BookingCategory::Airport, 35.0, 50), &rule);
        let peak = calculate_fare(
            &FareInput {
                completed_at: at(8, 15),
                ..input(BookingCategory::Airport, 35.0, 50)
            },
            &rule,
        );

        assert_eq!(off_peak.total_fare, 1000.0);
        assert_eq!(peak.peak_multiplier, 1.5);
        assert_eq!(peak.total_fare, 1500.0);
    }

    #[test]
    fn window_boundaries() {
        assert!(is_night(at(22, 0)));
        assert!(is_night(at(5, 59)));
        assert!(!is_night(at(6, 0)));
        assert!(is_peak(at(6, 0)));
        assert!(!is_peak(at(10, 0)));
        assert!(is_peak(at(21, 59)));
        assert!(!is_peak(at(22, 0)));
    }

    #[test]
    fn negative_inputs_never_produce_negative_fare() {
        let rule = FareRule::flat(BookingCategory::Regular, VehicleClass::Mini, -10.0, -3.0, -1.0);
        let fare = calculate_fare(&input(BookingCategory::Regular, -4.0, 10), &rule);
        assert!(fare.total_fare >= 0.0);
        assert!(fare.distance_km >= 0.0);
    }

    #[test]
    fn identical_inputs_give_identical_fares() {
        let rule = regular_rule();
        let fare_input = input(BookingCategory::Regular, 7.3, 19);
        assert_eq!(calculate_fare(&fare_input, &rule), calculate_fare(&fare_input, &rule));
    }
}
