//! Session-scoped ride lifecycle controller.
//!
//! One controller exists per signed-in driver. It is the only writer of ride
//! status and of the driver's availability. Races between drivers are settled
//! by the store's conditional updates. Within one session, state-changing
//! operations run one at a time under `op_lock` so a check such as "not
//! already holding a ride" still holds when its write lands. Refreshes never
//! take that lock. The driver's view is a [`DriverSnapshot`] published on
//! a watch channel, stamped with a generation so an older reconciliation
//! finishing late cannot overwrite newer state.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::bridge::RefreshTrigger;
use crate::engine::fare::{FareInput, calculate_fare};
use crate::engine::lifecycle::{RideEvent, next_status};
use crate::engine::otp::{Checkpoint, generate_otp, verify_otp};
use crate::engine::tracker::{TripTracker, elapsed_minutes};
use crate::error::RideError;
use crate::geo::haversine_km;
use crate::models::driver::{Availability, Driver};
use crate::models::fare::FareBreakdown;
use crate::models::notification::{DeclineMarker, NotificationStatus};
use crate::models::ride::{BookingCategory, GeoPoint, Ride, RideStatus};
use crate::observability::metrics::Metrics;
use crate::store::{ChangeEvent, RideGuard, RidePatch, RideQuery, RideStore, Table};

/// What the driver's screens render.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DriverSnapshot {
    pub driver: Option<Driver>,
    /// Rides held by this driver, newest first.
    pub assigned: Vec<Ride>,
    /// Open requests offered to this driver and not declined.
    pub pending_offers: Vec<Ride>,
}

impl DriverSnapshot {
    pub fn active_ride(&self) -> Option<&Ride> {
        self.assigned.first()
    }

    fn upsert_assigned(&mut self, ride: Ride) {
        self.pending_offers.retain(|offer| offer.id != ride.id);
        match self.assigned.iter_mut().find(|held| held.id == ride.id) {
            Some(held) => *held = ride,
            None => self.assigned.insert(0, ride),
        }
    }

    fn remove_ride(&mut self, ride_id: Uuid) {
        self.assigned.retain(|ride| ride.id != ride_id);
        self.pending_offers.retain(|ride| ride.id != ride_id);
    }

    fn set_availability(&mut self, availability: Availability) {
        if let Some(driver) = self.driver.as_mut() {
            driver.availability = availability;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedSnapshot {
    pub generation: u64,
    pub snapshot: DriverSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Accepted(Ride),
    /// Another driver claimed the ride first, or it is no longer open.
    AlreadyTaken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OtpVerification<T> {
    Verified(T),
    /// Wrong code; the ride is unchanged and the driver may retry.
    Mismatch,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletedRide {
    pub ride: Ride,
    pub fare: FareBreakdown,
}

pub struct RideController {
    driver_id: Uuid,
    store: Arc<dyn RideStore>,
    config: Config,
    metrics: Metrics,
    snapshot_tx: watch::Sender<PublishedSnapshot>,
    generation: AtomicU64,
    op_lock: Mutex<()>,
    tracker: Mutex<Option<TripTracker>>,
    /// Whether this session's live trip is counted in `active_trips`.
    trip_counted: AtomicBool,
    last_location: Mutex<Option<GeoPoint>>,
    closed: AtomicBool,
}

impl RideController {
    pub fn new(driver_id: Uuid, store: Arc<dyn RideStore>, config: Config, metrics: Metrics) -> Self {
        let (snapshot_tx, _unused_rx) = watch::channel(PublishedSnapshot::default());

        Self {
            driver_id,
            store,
            config,
            metrics,
            snapshot_tx,
            generation: AtomicU64::new(0),
            op_lock: Mutex::new(()),
            tracker: Mutex::new(None),
            trip_counted: AtomicBool::new(false),
            last_location: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn driver_id(&self) -> Uuid {
        self.driver_id
    }

    pub fn snapshot(&self) -> DriverSnapshot {
        self.snapshot_tx.borrow().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.uncount_trip();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether a store change could alter this driver's view.
    pub fn is_relevant(&self, event: &ChangeEvent) -> bool {
        if event.driver_id == Some(self.driver_id) {
            return true;
        }
        if event.table != Table::Rides {
            return false;
        }

        let published = self.snapshot_tx.borrow();
        published
            .snapshot
            .assigned
            .iter()
            .chain(published.snapshot.pending_offers.iter())
            .any(|ride| ride.id == event.row_id)
    }

    /// Re-reads the driver's rides and open offers and publishes them.
    ///
    /// Read-only against the store and safe to run concurrently with itself. On
    /// failure the previously published snapshot is kept.
    pub async fn refresh_state(&self, trigger: RefreshTrigger) -> Result<DriverSnapshot, RideError> {
        self.ensure_open("refresh")?;

        let generation = self.next_generation();
        let start = Instant::now();
        self.metrics
            .refresh_total
            .with_label_values(&[trigger.as_str()])
            .inc();

        match self.load_snapshot().await {
            Ok(snapshot) => {
                self.metrics
                    .refresh_latency_seconds
                    .with_label_values(&["success"])
                    .observe(start.elapsed().as_secs_f64());

                let published = self.publish(generation, snapshot);
                if !published {
                    debug!(driver_id = %self.driver_id, generation, "stale refresh discarded");
                }
                Ok(self.snapshot())
            }
            Err(err) => {
                self.metrics
                    .refresh_latency_seconds
                    .with_label_values(&["error"])
                    .observe(start.elapsed().as_secs_f64());
                warn!(
                    driver_id = %self.driver_id,
                    trigger = trigger.as_str(),
                    error = %err,
                    "refresh failed; keeping previous snapshot"
                );
                Err(err)
            }
        }
    }

    pub async fn accept_ride(&self, ride_id: Uuid) -> Result<AcceptOutcome, RideError> {
        self.ensure_open("accept")?;
        let _op = self.op_lock.lock().await;

        let result = self.try_accept(ride_id).await;
        let outcome = match &result {
            Ok(AcceptOutcome::Accepted(_)) => "accepted",
            Ok(AcceptOutcome::AlreadyTaken) => "already_taken",
            Err(_) => "error",
        };
        self.metrics
            .record_transition(RideEvent::Accept.as_str(), outcome);
        result
    }

    async fn try_accept(&self, ride_id: Uuid) -> Result<AcceptOutcome, RideError> {
        let driver = self.load_driver().await?;
        if !driver.verified {
            warn!(driver_id = %self.driver_id, "unverified driver tried to accept a ride");
            return Err(RideError::Precondition("driver is not verified".to_string()));
        }
        let missing = driver.missing_profile_fields();
        if !missing.is_empty() {
            warn!(driver_id = %self.driver_id, missing = ?missing, "incomplete profile");
            return Err(RideError::Precondition(format!(
                "incomplete profile: {}",
                missing.join(", ")
            )));
        }

        if let Some(current) = self.held_ride().await? {
            if current.id == ride_id {
                return Ok(AcceptOutcome::Accepted(current));
            }
            return Err(RideError::Precondition(format!(
                "already assigned to ride {}",
                current.id
            )));
        }

        let ride = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or(RideError::RideNotFound(ride_id))?;
        if !ride.is_open_offer() {
            return Ok(self.lost_race(ride_id).await);
        }

        let guard = RideGuard::status(RideStatus::Requested).unassigned();
        let patch = RidePatch {
            status: Some(RideStatus::Accepted),
            driver_id: Some(Some(self.driver_id)),
            accepted_at: Some(Utc::now()),
            ..RidePatch::default()
        };
        let Some(ride) = self.store.update_ride(ride_id, &guard, patch).await? else {
            return Ok(self.lost_race(ride_id).await);
        };

        self.set_availability(Availability::Busy).await;
        if let Err(err) = self
            .store
            .mark_notifications(self.driver_id, ride_id, NotificationStatus::Read)
            .await
        {
            warn!(ride_id = %ride_id, error = %err, "failed to mark offer read");
        }

        self.update_local(|snapshot| {
            snapshot.upsert_assigned(ride.clone());
            snapshot.set_availability(Availability::Busy);
        });
        info!(ride_id = %ride_id, driver_id = %self.driver_id, "ride accepted");
        Ok(AcceptOutcome::Accepted(ride))
    }

    async fn lost_race(&self, ride_id: Uuid) -> AcceptOutcome {
        info!(ride_id = %ride_id, driver_id = %self.driver_id, "ride already taken");
        if let Err(err) = self
            .store
            .mark_notifications(self.driver_id, ride_id, NotificationStatus::Cancelled)
            .await
        {
            debug!(ride_id = %ride_id, error = %err, "failed to retire stale offer");
        }
        self.update_local(|snapshot| snapshot.remove_ride(ride_id));
        AcceptOutcome::AlreadyTaken
    }

    /// Hides the offer from this driver for good. The ride stays open for others.
    pub async fn decline_ride(&self, ride_id: Uuid) -> Result<(), RideError> {
        self.ensure_open("decline")?;
        let _op = self.op_lock.lock().await;

        let result = self.try_decline(ride_id).await;
        self.metrics
            .record_transition("decline", if result.is_ok() { "declined" } else { "error" });
        result
    }

    async fn try_decline(&self, ride_id: Uuid) -> Result<(), RideError> {
        self.store
            .upsert_decline(DeclineMarker {
                driver_id: self.driver_id,
                ride_id,
                declined_at: Utc::now(),
            })
            .await?;
        self.store
            .mark_notifications(self.driver_id, ride_id, NotificationStatus::Cancelled)
            .await?;

        self.update_local(|snapshot| {
            snapshot.pending_offers.retain(|offer| offer.id != ride_id);
        });
        info!(ride_id = %ride_id, driver_id = %self.driver_id, "ride declined");
        Ok(())
    }

    pub async fn mark_arrived(&self, ride_id: Uuid) -> Result<Ride, RideError> {
        self.ensure_open("mark_arrived")?;
        let _op = self.op_lock.lock().await;

        let result = self.try_mark_arrived(ride_id).await;
        self.record_result(RideEvent::MarkArrived.as_str(), &result);
        result
    }

    async fn try_mark_arrived(&self, ride_id: Uuid) -> Result<Ride, RideError> {
        let (_, target) = self.load_for_event(ride_id, RideEvent::MarkArrived).await?;

        let guard = RideGuard::status(RideStatus::Accepted).driver(self.driver_id);
        let patch = RidePatch {
            status: Some(target),
            ..RidePatch::default()
        };
        let ride = self
            .guarded_update(ride_id, RideEvent::MarkArrived.as_str(), &guard, patch)
            .await?;

        self.update_local(|snapshot| snapshot.upsert_assigned(ride.clone()));
        info!(ride_id = %ride_id, "driver arrived at pickup");
        Ok(ride)
    }

    pub async fn generate_pickup_otp(&self, ride_id: Uuid) -> Result<String, RideError> {
        self.generate_otp(ride_id, Checkpoint::Pickup).await
    }

    pub async fn generate_drop_otp(&self, ride_id: Uuid) -> Result<String, RideError> {
        self.generate_otp(ride_id, Checkpoint::Drop).await
    }

    async fn generate_otp(&self, ride_id: Uuid, checkpoint: Checkpoint) -> Result<String, RideError> {
        let operation = match checkpoint {
            Checkpoint::Pickup => "generate_pickup_otp",
            Checkpoint::Drop => "generate_drop_otp",
        };
        self.ensure_open(operation)?;
        let _op = self.op_lock.lock().await;

        let result = self.try_generate_otp(ride_id, checkpoint, operation).await;
        self.record_result(operation, &result);
        result
    }

    async fn try_generate_otp(
        &self,
        ride_id: Uuid,
        checkpoint: Checkpoint,
        operation: &'static str,
    ) -> Result<String, RideError> {
        let required = match checkpoint {
            Checkpoint::Pickup => RideStatus::DriverArrived,
            Checkpoint::Drop => RideStatus::InProgress,
        };
        self.load_own_ride(ride_id, operation, &[required]).await?;

        let code = generate_otp(&mut rand::thread_rng());
        let mut patch = RidePatch::default();
        match checkpoint {
            Checkpoint::Pickup => patch.pickup_otp = Some(Some(code.clone())),
            Checkpoint::Drop => patch.drop_otp = Some(Some(code.clone())),
        }

        let guard = RideGuard::status(required).driver(self.driver_id);
        let ride = self.guarded_update(ride_id, operation, &guard, patch).await?;

        self.update_local(|snapshot| snapshot.upsert_assigned(ride));
        info!(ride_id = %ride_id, checkpoint = ?checkpoint, "otp issued");
        Ok(code)
    }

    /// Starts the trip when `code` matches the stored pickup code.
    pub async fn verify_pickup_otp(
        &self,
        ride_id: Uuid,
        code: &str,
    ) -> Result<OtpVerification<Ride>, RideError> {
        self.ensure_open("verify_pickup")?;
        let _op = self.op_lock.lock().await;

        let result = self.try_verify_pickup(ride_id, code).await;
        let outcome = match &result {
            Ok(OtpVerification::Verified(_)) => "verified",
            Ok(OtpVerification::Mismatch) => "mismatch",
            Err(_) => "error",
        };
        self.metrics
            .record_transition(RideEvent::VerifyPickup.as_str(), outcome);
        result
    }

    async fn try_verify_pickup(
        &self,
        ride_id: Uuid,
        code: &str,
    ) -> Result<OtpVerification<Ride>, RideError> {
        let event = RideEvent::VerifyPickup;
        let (ride, target) = self.load_for_event(ride_id, event).await?;

        let stored = match ride.pickup_otp.as_deref() {
            Some(stored) if verify_otp(Some(stored), code) => stored.to_string(),
            _ => {
                warn!(ride_id = %ride_id, "pickup otp mismatch");
                return Ok(OtpVerification::Mismatch);
            }
        };

        let started_at = Utc::now();
        let start = self.last_location.lock().await.unwrap_or(ride.pickup);
        let guard = RideGuard::status(RideStatus::DriverArrived)
            .driver(self.driver_id)
            .pickup_otp(stored);
        let patch = RidePatch {
            status: Some(target),
            pickup_otp: Some(None),
            trip_started_at: Some(started_at),
            trip_start_location: Some(start),
            ..RidePatch::default()
        };

        let Some(ride) = self.store.update_ride(ride_id, &guard, patch).await? else {
            // Either the code was regenerated or the ride moved on meanwhile.
            let current = self.store.get_ride(ride_id).await?;
            return match current {
                Some(current) if current.status == RideStatus::DriverArrived => {
                    Ok(OtpVerification::Mismatch)
                }
                _ => Err(self.explain_rejection(ride_id, event.as_str()).await),
            };
        };

        self.start_tracking(TripTracker::start(ride_id, started_at, start))
            .await;
        self.update_local(|snapshot| snapshot.upsert_assigned(ride.clone()));
        info!(ride_id = %ride_id, "pickup verified; trip started");
        Ok(OtpVerification::Verified(ride))
    }

    /// Completes the trip when `code` matches the stored drop code.
    pub async fn verify_drop_otp(
        &self,
        ride_id: Uuid,
        code: &str,
    ) -> Result<OtpVerification<CompletedRide>, RideError> {
        self.ensure_open("verify_drop")?;
        let _op = self.op_lock.lock().await;

        let ride = self
            .load_own_ride(ride_id, "verify_drop", &[RideStatus::InProgress])
            .await?;
        if !verify_otp(ride.drop_otp.as_deref(), code) {
            warn!(ride_id = %ride_id, "drop otp mismatch");
            self.metrics.record_transition("verify_drop", "mismatch");
            return Ok(OtpVerification::Mismatch);
        }

        let expected = ride.drop_otp.clone();
        self.complete_with_guard(ride_id, expected)
            .await
            .map(OtpVerification::Verified)
    }

    pub async fn complete_ride(&self, ride_id: Uuid) -> Result<CompletedRide, RideError> {
        self.ensure_open("complete")?;
        let _op = self.op_lock.lock().await;
        self.complete_with_guard(ride_id, None).await
    }

    async fn complete_with_guard(
        &self,
        ride_id: Uuid,
        drop_otp: Option<String>,
    ) -> Result<CompletedRide, RideError> {
        let result = self.try_complete(ride_id, drop_otp).await;
        self.record_result(RideEvent::Complete.as_str(), &result);
        result
    }

    async fn try_complete(
        &self,
        ride_id: Uuid,
        drop_otp: Option<String>,
    ) -> Result<CompletedRide, RideError> {
        let event = RideEvent::Complete;
        let (ride, target) = self.load_for_event(ride_id, event).await?;

        let rule = self
            .store
            .get_fare_rule(ride.category, ride.vehicle_class)
            .await?
            .ok_or(RideError::MissingFareRule {
                category: ride.category,
                vehicle_class: ride.vehicle_class,
            })?;

        let now = Utc::now();
        let (distance_km, duration_minutes) = self.measure_trip(&ride, now).await;
        let fare = calculate_fare(
            &FareInput {
                category: ride.category,
                vehicle_class: ride.vehicle_class,
                distance_km,
                duration_minutes,
                completed_at: self.local_time(now),
                booked_hours: ride.rental_hours.unwrap_or(0),
            },
            &rule,
        );

        let mut guard = RideGuard::status(RideStatus::InProgress).driver(self.driver_id);
        if let Some(code) = drop_otp {
            guard = guard.drop_otp(code);
        }
        let patch = RidePatch {
            status: Some(target),
            pickup_otp: Some(None),
            drop_otp: Some(None),
            fare: Some(Some(fare.clone())),
            distance_km: Some(fare.distance_km),
            duration_minutes: Some(duration_minutes),
            completed_at: Some(now),
            ..RidePatch::default()
        };
        let ride = self
            .guarded_update(ride_id, event.as_str(), &guard, patch)
            .await?;

        self.stop_tracking(ride_id).await;
        self.set_availability(Availability::Online).await;
        self.update_local(|snapshot| {
            snapshot.remove_ride(ride_id);
            snapshot.set_availability(Availability::Online);
        });
        info!(
            ride_id = %ride_id,
            total_fare = fare.total_fare,
            distance_km = fare.distance_km,
            duration_minutes,
            "ride completed"
        );
        Ok(CompletedRide { ride, fare })
    }

    pub async fn cancel_ride(
        &self,
        ride_id: Uuid,
        reason: &str,
        cancelled_by: Uuid,
    ) -> Result<Ride, RideError> {
        self.ensure_open("cancel")?;
        let _op = self.op_lock.lock().await;

        let result = self.try_cancel(ride_id, reason, cancelled_by).await;
        self.record_result(RideEvent::Cancel.as_str(), &result);
        result
    }

    async fn try_cancel(
        &self,
        ride_id: Uuid,
        reason: &str,
        cancelled_by: Uuid,
    ) -> Result<Ride, RideError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RideError::Precondition(
                "cancellation reason is required".to_string(),
            ));
        }

        let event = RideEvent::Cancel;
        let (_, target) = self.load_for_event(ride_id, event).await?;

        let guard = RideGuard::statuses(event.sources()).driver(self.driver_id);
        let patch = RidePatch {
            status: Some(target),
            pickup_otp: Some(None),
            drop_otp: Some(None),
            cancellation_reason: Some(reason.to_string()),
            cancelled_by: Some(cancelled_by),
            ..RidePatch::default()
        };
        let ride = self
            .guarded_update(ride_id, event.as_str(), &guard, patch)
            .await?;

        self.stop_tracking(ride_id).await;
        self.set_availability(Availability::Online).await;
        self.update_local(|snapshot| {
            snapshot.remove_ride(ride_id);
            snapshot.set_availability(Availability::Online);
        });
        info!(ride_id = %ride_id, reason, cancelled_by = %cancelled_by, "ride cancelled");
        Ok(ride)
    }

    /// Stores the driver's position and extends the running trip, if any.
    pub async fn record_location(&self, point: GeoPoint) -> Result<(), RideError> {
        self.ensure_open("record_location")?;

        *self.last_location.lock().await = Some(point);
        if let Some(tracker) = self.tracker.lock().await.as_mut() {
            tracker.record(point, Utc::now());
        }

        self.store
            .set_driver_location(self.driver_id, point)
            .await?
            .ok_or(RideError::DriverNotFound(self.driver_id))?;
        Ok(())
    }

    pub async fn go_online(&self) -> Result<Driver, RideError> {
        self.ensure_open("go_online")?;
        self.change_shift(Availability::Online).await
    }

    pub async fn go_offline(&self) -> Result<Driver, RideError> {
        self.ensure_open("go_offline")?;
        self.change_shift(Availability::Offline).await
    }

    async fn change_shift(&self, availability: Availability) -> Result<Driver, RideError> {
        let _op = self.op_lock.lock().await;
        if let Some(ride) = self.held_ride().await? {
            return Err(RideError::Precondition(format!(
                "finish or cancel ride {} first",
                ride.id
            )));
        }

        let driver = self
            .store
            .set_driver_availability(self.driver_id, availability)
            .await?
            .ok_or(RideError::DriverNotFound(self.driver_id))?;
        self.update_local(|snapshot| snapshot.driver = Some(driver.clone()));
        info!(driver_id = %self.driver_id, availability = ?availability, "shift changed");
        Ok(driver)
    }

    /// Rebuilds the trip tracker for a ride that was already in progress when
    /// this session started.
    pub async fn restore_trip(&self) {
        let in_progress = self
            .snapshot()
            .assigned
            .into_iter()
            .find(|ride| ride.status == RideStatus::InProgress);
        let Some(ride) = in_progress else {
            return;
        };

        let mut tracker = self.tracker.lock().await;
        if tracker.is_some() {
            return;
        }
        let started_at = ride.trip_started_at.unwrap_or_else(Utc::now);
        let start = ride.trip_start_location.unwrap_or(ride.pickup);
        *tracker = Some(TripTracker::start(ride.id, started_at, start));
        self.count_trip();
        info!(ride_id = %ride.id, "trip tracking restored");
    }

    async fn load_snapshot(&self) -> Result<DriverSnapshot, RideError> {
        let driver = self.load_driver().await?;

        let assigned = self
            .store
            .query_rides(&RideQuery {
                driver_id: Some(self.driver_id),
                statuses: RideStatus::ACTIVE.to_vec(),
                ..RideQuery::default()
            })
            .await?;

        let declined: HashSet<Uuid> = self
            .store
            .declines_for(self.driver_id)
            .await?
            .into_iter()
            .map(|marker| marker.ride_id)
            .collect();

        let mut offered = Vec::new();
        for notification in self
            .store
            .notifications_for(self.driver_id, NotificationStatus::Unread)
            .await?
        {
            if !declined.contains(&notification.ride_id) && !offered.contains(&notification.ride_id) {
                offered.push(notification.ride_id);
            }
        }

        let pending_offers = if offered.is_empty() {
            Vec::new()
        } else {
            self.store
                .query_rides(&RideQuery {
                    ids: Some(offered),
                    unassigned_only: true,
                    statuses: vec![RideStatus::Requested],
                    limit: Some(self.config.offer_limit),
                    ..RideQuery::default()
                })
                .await?
        };

        Ok(DriverSnapshot {
            driver: Some(driver),
            assigned,
            pending_offers,
        })
    }

    async fn load_driver(&self) -> Result<Driver, RideError> {
        self.store
            .get_driver(self.driver_id)
            .await?
            .ok_or(RideError::DriverNotFound(self.driver_id))
    }

    async fn held_ride(&self) -> Result<Option<Ride>, RideError> {
        let held = self
            .store
            .query_rides(&RideQuery {
                driver_id: Some(self.driver_id),
                statuses: RideStatus::ACTIVE.to_vec(),
                limit: Some(1),
                ..RideQuery::default()
            })
            .await?;
        Ok(held.into_iter().next())
    }

    async fn load_held_ride(&self, ride_id: Uuid, operation: &'static str) -> Result<Ride, RideError> {
        let ride = self
            .store
            .get_ride(ride_id)
            .await?
            .ok_or(RideError::RideNotFound(ride_id))?;

        if ride.driver_id != Some(self.driver_id) {
            warn!(ride_id = %ride_id, driver_id = %self.driver_id, operation, "ride not held by driver");
            return Err(RideError::Precondition(format!(
                "ride {ride_id} is not assigned to this driver"
            )));
        }
        Ok(ride)
    }

    /// Reads a ride held by this driver and checks it is in one of `allowed`.
    async fn load_own_ride(
        &self,
        ride_id: Uuid,
        operation: &'static str,
        allowed: &[RideStatus],
    ) -> Result<Ride, RideError> {
        let ride = self.load_held_ride(ride_id, operation).await?;
        if !allowed.contains(&ride.status) {
            warn!(ride_id = %ride_id, status = %ride.status, operation, "invalid transition");
            return Err(RideError::InvalidState {
                operation,
                current: ride.status,
            });
        }
        Ok(ride)
    }

    /// Reads a ride held by this driver and resolves the status `event` moves it to.
    async fn load_for_event(
        &self,
        ride_id: Uuid,
        event: RideEvent,
    ) -> Result<(Ride, RideStatus), RideError> {
        let ride = self.load_held_ride(ride_id, event.as_str()).await?;
        match next_status(ride.status, event) {
            Some(target) => Ok((ride, target)),
            None => {
                warn!(ride_id = %ride_id, status = %ride.status, event = event.as_str(), "invalid transition");
                Err(RideError::InvalidState {
                    operation: event.as_str(),
                    current: ride.status,
                })
            }
        }
    }

    async fn guarded_update(
        &self,
        ride_id: Uuid,
        operation: &'static str,
        guard: &RideGuard,
        patch: RidePatch,
    ) -> Result<Ride, RideError> {
        match self.store.update_ride(ride_id, guard, patch).await? {
            Some(ride) => Ok(ride),
            None => Err(self.explain_rejection(ride_id, operation).await),
        }
    }

    /// Turns a zero-row conditional update into the error the driver should see.
    async fn explain_rejection(&self, ride_id: Uuid, operation: &'static str) -> RideError {
        match self.store.get_ride(ride_id).await {
            Ok(Some(ride)) if ride.driver_id != Some(self.driver_id) => RideError::Precondition(
                format!("ride {ride_id} is not assigned to this driver"),
            ),
            Ok(Some(ride)) => {
                warn!(ride_id = %ride_id, status = %ride.status, operation, "ride changed concurrently");
                RideError::InvalidState {
                    operation,
                    current: ride.status,
                }
            }
            Ok(None) => RideError::RideNotFound(ride_id),
            Err(err) => err.into(),
        }
    }

    /// Distance and duration billed for `ride`.
    ///
    /// Regular and rental rides bill tracked distance, falling back to the
    /// straight line when nothing was tracked. Outstation and airport rides
    /// always bill the straight line.
    async fn measure_trip(&self, ride: &Ride, now: DateTime<Utc>) -> (f64, u32) {
        let straight_line = haversine_km(&ride.pickup, &ride.destination);
        let tracked = self
            .tracker
            .lock()
            .await
            .as_ref()
            .filter(|tracker| tracker.ride_id() == ride.id)
            .map(|tracker| tracker.finish(now));

        let distance_km = match ride.category {
            BookingCategory::Regular | BookingCategory::Rental => tracked
                .and_then(|metrics| metrics.distance_km)
                .unwrap_or(straight_line),
            BookingCategory::Outstation | BookingCategory::Airport => straight_line,
        };

        let duration_minutes = match (tracked, ride.trip_started_at) {
            (Some(metrics), _) => metrics.elapsed_minutes,
            (None, Some(started_at)) => elapsed_minutes(started_at, now),
            (None, None) => {
                let speed = self.config.fallback_speed_kmh.max(1.0);
                (distance_km / speed * 60.0).round() as u32
            }
        };

        (distance_km, duration_minutes)
    }

    fn local_time(&self, now: DateTime<Utc>) -> NaiveDateTime {
        match FixedOffset::east_opt(self.config.utc_offset_minutes * 60) {
            Some(offset) => now.with_timezone(&offset).naive_local(),
            None => now.naive_utc(),
        }
    }

    async fn start_tracking(&self, tracker: TripTracker) {
        self.tracker.lock().await.replace(tracker);
        self.count_trip();
    }

    async fn stop_tracking(&self, ride_id: Uuid) {
        let mut tracker = self.tracker.lock().await;
        if tracker.as_ref().is_some_and(|current| current.ride_id() == ride_id) {
            *tracker = None;
            self.uncount_trip();
        }
    }

    /// The gauge counts each live trip once per open session; a closed
    /// session hands the trip over to whichever session restores it.
    fn count_trip(&self) {
        if !self.is_closed() && !self.trip_counted.swap(true, Ordering::SeqCst) {
            self.metrics.active_trips.inc();
        }
    }

    fn uncount_trip(&self) {
        if self.trip_counted.swap(false, Ordering::SeqCst) {
            self.metrics.active_trips.dec();
        }
    }

    /// Writes availability as a side effect of a committed transition. The
    /// transition stands even if this write fails; the next refresh shows it.
    async fn set_availability(&self, availability: Availability) {
        match self
            .store
            .set_driver_availability(self.driver_id, availability)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => error!(driver_id = %self.driver_id, "driver row missing"),
            Err(err) => error!(
                driver_id = %self.driver_id,
                availability = ?availability,
                error = %err,
                "failed to update availability"
            ),
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), RideError> {
        if self.is_closed() {
            warn!(driver_id = %self.driver_id, operation, "operation on closed session ignored");
            return Err(RideError::SessionClosed);
        }
        Ok(())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replaces the snapshot unless a newer generation is already published.
    fn publish(&self, generation: u64, snapshot: DriverSnapshot) -> bool {
        let mut accepted = false;
        self.snapshot_tx.send_if_modified(|current| {
            if generation < current.generation {
                return false;
            }
            accepted = true;
            current.generation = generation;
            if current.snapshot == snapshot {
                return false;
            }
            current.snapshot = snapshot;
            true
        });
        accepted
    }

    fn update_local(&self, edit: impl FnOnce(&mut DriverSnapshot)) {
        let generation = self.next_generation();
        self.snapshot_tx.send_modify(|current| {
            current.generation = current.generation.max(generation);
            edit(&mut current.snapshot);
        });
    }

    fn record_result<T>(&self, operation: &str, result: &Result<T, RideError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => {
                if matches!(err, RideError::Store(_)) {
                    error!(driver_id = %self.driver_id, operation, error = %err, "store call failed");
                }
                "error"
            }
        };
        self.metrics.record_transition(operation, outcome);
    }
}
