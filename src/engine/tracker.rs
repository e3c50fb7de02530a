use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::ride::GeoPoint;

/// What a finished trip measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripMetrics {
    pub elapsed_minutes: u32,
    /// `None` when no location sample arrived after the start.
    pub distance_km: Option<f64>,
    pub samples: usize,
}

/// Accumulates time and distance for the one in-progress trip of a session.
#[derive(Debug, Clone)]
pub struct TripTracker {
    ride_id: Uuid,
    started_at: DateTime<Utc>,
    last_point: GeoPoint,
    distance_km: f64,
    samples: usize,
}

impl TripTracker {
    pub fn start(ride_id: Uuid, started_at: DateTime<Utc>, start: GeoPoint) -> Self {
        Self {
            ride_id,
            started_at,
            last_point: start,
            distance_km: 0.0,
            samples: 0,
        }
    }

    pub fn ride_id(&self) -> Uuid {
        self.ride_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Adds the leg from the previous point. Samples older than the start are dropped.
    pub fn record(&mut self, point: GeoPoint, at: DateTime<Utc>) {
        if at < self.started_at {
            return;
        }
        self.distance_km += haversine_km(&self.last_point, &point);
        self.last_point = point;
        self.samples += 1;
    }

    pub fn finish(&self, now: DateTime<Utc>) -> TripMetrics {
        TripMetrics {
            elapsed_minutes: elapsed_minutes(self.started_at, now),
            distance_km: (self.samples > 0).then_some(self.distance_km),
            samples: self.samples,
        }
    }
}

/// Whole minutes between two instants, rounded to nearest and never negative.
pub fn elapsed_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let seconds = (to - from).num_seconds().max(0) as f64;
    (seconds / 60.0).round() as u32
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{TripTracker, elapsed_minutes};
    use crate::models::ride::GeoPoint;

    fn start() -> GeoPoint {
        GeoPoint { lat: 12.9716, lng: 77.5946 }
    }

    #[test]
    fn no_samples_reports_no_distance() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let tracker = TripTracker::start(Uuid::new_v4(), started, start());
        let metrics = tracker.finish(started + Duration::seconds(20 * 60 + 40));

        assert_eq!(metrics.elapsed_minutes, 21);
        assert_eq!(metrics.distance_km, None);
        assert_eq!(metrics.samples, 0);
    }

    #[test]
    fn distance_sums_consecutive_legs() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let mut tracker = TripTracker::start(Uuid::new_v4(), started, start());

        // roughly 1.11 km per 0.01 degree of latitude
        tracker.record(GeoPoint { lat: 12.9816, lng: 77.5946 }, started + Duration::minutes(2));
        tracker.record(GeoPoint { lat: 12.9916, lng: 77.5946 }, started + Duration::minutes(4));
        tracker.record(GeoPoint { lat: 12.9816, lng: 77.5946 }, started + Duration::minutes(6));

        let metrics = tracker.finish(started + Duration::minutes(6));
        let distance = metrics.distance_km.unwrap();
        assert!((distance - 3.336).abs() < 0.01, "distance was {distance}");
        assert_eq!(metrics.samples, 3);
    }

    #[test]
    fn samples_before_start_are_ignored() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let mut tracker = TripTracker::start(Uuid::new_v4(), started, start());
        tracker.record(GeoPoint { lat: 13.5, lng: 78.0 }, started - Duration::minutes(1));

        assert_eq!(tracker.finish(started).distance_km, None);
    }

    #[test]
    fn elapsed_minutes_never_negative() {
        let now = Utc::now();
        assert_eq!(elapsed_minutes(now, now - Duration::minutes(5)), 0);
        assert_eq!(elapsed_minutes(now, now + Duration::seconds(89)), 1);
        assert_eq!(elapsed_minutes(now, now + Duration::seconds(90)), 2);
    }
}
