use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::driver::{Availability, Driver};
use crate::models::fare::FareRule;
use crate::models::notification::{DeclineMarker, Notification, NotificationStatus};
use crate::models::ride::{BookingCategory, GeoPoint, Ride, VehicleClass};
use crate::store::{
    ChangeEvent, ChangeKind, RideGuard, RidePatch, RideQuery, RideStore, StoreResult, Table,
};

/// In-process row store. Each row write happens under its DashMap shard lock,
/// which gives row-level compare-and-swap for [`RideStore::update_ride`].
pub struct MemoryStore {
    rides: DashMap<Uuid, Ride>,
    drivers: DashMap<Uuid, Driver>,
    fare_rules: DashMap<(BookingCategory, VehicleClass), FareRule>,
    notifications: DashMap<Uuid, Notification>,
    declines: DashMap<(Uuid, Uuid), DeclineMarker>,
    events_tx: broadcast::Sender<ChangeEvent>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            rides: DashMap::new(),
            drivers: DashMap::new(),
            fare_rules: DashMap::new(),
            notifications: DashMap::new(),
            declines: DashMap::new(),
            events_tx,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates losing the connection: every call fails until switched back on.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store connection lost".to_string()))
        }
    }

    fn publish(&self, table: Table, kind: ChangeKind, row_id: Uuid, driver_id: Option<Uuid>) {
        let _ = self.events_tx.send(ChangeEvent {
            table,
            kind,
            row_id,
            driver_id,
            at: Utc::now(),
        });
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn get_ride(&self, ride_id: Uuid) -> StoreResult<Option<Ride>> {
        self.ensure_available()?;
        Ok(self.rides.get(&ride_id).map(|entry| entry.value().clone()))
    }

    async fn query_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>> {
        self.ensure_available()?;

        let mut rides: Vec<Ride> = self
            .rides
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            rides.truncate(limit);
        }
        Ok(rides)
    }

    async fn insert_ride(&self, ride: Ride) -> StoreResult<Ride> {
        self.ensure_available()?;

        match self.rides.entry(ride.id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate(format!("ride {}", ride.id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(ride.clone());
            }
        }
        self.publish(Table::Rides, ChangeKind::Insert, ride.id, ride.driver_id);
        Ok(ride)
    }

    async fn update_ride(
        &self,
        ride_id: Uuid,
        guard: &RideGuard,
        patch: RidePatch,
    ) -> StoreResult<Option<Ride>> {
        self.ensure_available()?;

        let updated = {
            let Some(mut row) = self.rides.get_mut(&ride_id) else {
                return Ok(None);
            };
            if !guard.matches(row.value()) {
                return Ok(None);
            }
            patch.apply(row.value_mut());
            row.value().clone()
        };

        self.publish(Table::Rides, ChangeKind::Update, ride_id, updated.driver_id);
        Ok(Some(updated))
    }

    async fn get_driver(&self, driver_id: Uuid) -> StoreResult<Option<Driver>> {
        self.ensure_available()?;
        Ok(self.drivers.get(&driver_id).map(|entry| entry.value().clone()))
    }

    async fn list_drivers(&self) -> StoreResult<Vec<Driver>> {
        self.ensure_available()?;
        Ok(self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn upsert_driver(&self, driver: Driver) -> StoreResult<Driver> {
        self.ensure_available()?;

        let kind = match self.drivers.insert(driver.id, driver.clone()) {
            Some(_) => ChangeKind::Update,
            None => ChangeKind::Insert,
        };
        self.publish(Table::Drivers, kind, driver.id, Some(driver.id));
        Ok(driver)
    }

    async fn set_driver_availability(
        &self,
        driver_id: Uuid,
        availability: Availability,
    ) -> StoreResult<Option<Driver>> {
        self.ensure_available()?;

        let updated = {
            let Some(mut driver) = self.drivers.get_mut(&driver_id) else {
                return Ok(None);
            };
            driver.availability = availability;
            driver.updated_at = Utc::now();
            driver.clone()
        };

        self.publish(Table::Drivers, ChangeKind::Update, driver_id, Some(driver_id));
        Ok(Some(updated))
    }

    async fn set_driver_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> StoreResult<Option<Driver>> {
        self.ensure_available()?;

        // Location pings are frequent and carry no lifecycle meaning; no change event.
        let Some(mut driver) = self.drivers.get_mut(&driver_id) else {
            return Ok(None);
        };
        driver.location = Some(location);
        driver.updated_at = Utc::now();
        Ok(Some(driver.clone()))
    }

    async fn get_fare_rule(
        &self,
        category: BookingCategory,
        vehicle_class: VehicleClass,
    ) -> StoreResult<Option<FareRule>> {
        self.ensure_available()?;
        Ok(self
            .fare_rules
            .get(&(category, vehicle_class))
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_fare_rule(&self, rule: FareRule) -> StoreResult<FareRule> {
        self.ensure_available()?;
        self.fare_rules
            .insert((rule.category, rule.vehicle_class), rule.clone());
        Ok(rule)
    }

    async fn insert_notification(&self, notification: Notification) -> StoreResult<Notification> {
        self.ensure_available()?;

        match self.notifications.entry(notification.id) {
            Entry::Occupied(_) => {
                return Err(StoreError::Duplicate(format!(
                    "notification {}",
                    notification.id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
            }
        }
        self.publish(
            Table::Notifications,
            ChangeKind::Insert,
            notification.id,
            Some(notification.driver_id),
        );
        Ok(notification)
    }

    async fn notifications_for(
        &self,
        driver_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<Vec<Notification>> {
        self.ensure_available()?;

        let mut notifications: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| entry.driver_id == driver_id && entry.status == status)
            .map(|entry| entry.value().clone())
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notifications(
        &self,
        driver_id: Uuid,
        ride_id: Uuid,
        status: NotificationStatus,
    ) -> StoreResult<usize> {
        self.ensure_available()?;

        let mut touched = Vec::new();
        for mut entry in self.notifications.iter_mut() {
            if entry.driver_id == driver_id && entry.ride_id == ride_id && entry.status != status {
                entry.status = status;
                touched.push(entry.id);
            }
        }

        for id in &touched {
            self.publish(Table::Notifications, ChangeKind::Update, *id, Some(driver_id));
        }
        Ok(touched.len())
    }

    async fn upsert_decline(&self, marker: DeclineMarker) -> StoreResult<DeclineMarker> {
        self.ensure_available()?;

        let key = (marker.driver_id, marker.ride_id);
        let kind = match self.declines.insert(key, marker.clone()) {
            Some(_) => ChangeKind::Update,
            None => ChangeKind::Insert,
        };
        self.publish(Table::Declines, kind, marker.ride_id, Some(marker.driver_id));
        Ok(marker)
    }

    async fn declines_for(&self, driver_id: Uuid) -> StoreResult<Vec<DeclineMarker>> {
        self.ensure_available()?;
        Ok(self
            .declines
            .iter()
            .filter(|entry| entry.key().0 == driver_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::error::StoreError;
    use crate::models::notification::{DeclineMarker, Notification, NotificationStatus};
    use crate::models::ride::{BookingCategory, GeoPoint, Ride, RideStatus, VehicleClass};
    use crate::store::{ChangeKind, RideGuard, RidePatch, RideStore, Table};

    fn request() -> Ride {
        let point = GeoPoint { lat: 12.97, lng: 77.59 };
        Ride::new_request(
            Uuid::new_v4(),
            BookingCategory::Regular,
            VehicleClass::Mini,
            (point, "Koramangala".to_string()),
            (point, "HSR Layout".to_string()),
        )
    }

    fn claim(driver_id: Uuid) -> RidePatch {
        RidePatch {
            status: Some(RideStatus::Accepted),
            driver_id: Some(Some(driver_id)),
            ..RidePatch::default()
        }
    }

    #[tokio::test]
    async fn conditional_update_affects_zero_rows_once_claimed() {
        let store = MemoryStore::new(16);
        let ride = store.insert_ride(request()).await.unwrap();
        let guard = RideGuard::status(RideStatus::Requested).unassigned();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let won = store.update_ride(ride.id, &guard, claim(first)).await.unwrap();
        let lost = store.update_ride(ride.id, &guard, claim(second)).await.unwrap();

        assert_eq!(won.unwrap().driver_id, Some(first));
        assert!(lost.is_none());
        let stored = store.get_ride(ride.id).await.unwrap().unwrap();
        assert_eq!(stored.driver_id, Some(first));
    }

    #[tokio::test]
    async fn update_of_missing_ride_affects_zero_rows() {
        let store = MemoryStore::new(16);
        let result = store
            .update_ride(Uuid::new_v4(), &RideGuard::statuses(&[]), RidePatch::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new(16);
        let ride = request();
        store.insert_ride(ride.clone()).await.unwrap();
        let err = store.insert_ride(ride).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_inserts_of_one_row_admit_exactly_one() {
        let store = std::sync::Arc::new(MemoryStore::new(64));
        let mut events = store.subscribe();
        let ride = request();
        let notification = Notification::offer(Uuid::new_v4(), ride.id);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let ride = ride.clone();
            let notification = notification.clone();
            handles.push(tokio::spawn(async move {
                (
                    store.insert_ride(ride).await.is_ok(),
                    store.insert_notification(notification).await.is_ok(),
                )
            }));
        }

        let mut rides_won = 0;
        let mut notifications_won = 0;
        for handle in handles {
            let (ride_ok, notification_ok) = handle.await.unwrap();
            rides_won += usize::from(ride_ok);
            notifications_won += usize::from(notification_ok);
        }
        assert_eq!(rides_won, 1);
        assert_eq!(notifications_won, 1);

        let mut inserts = 0;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.kind, ChangeKind::Insert);
            inserts += 1;
        }
        assert_eq!(inserts, 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new(16);
        store.set_available(false);
        let err = store.get_ride(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_available(true);
        assert!(store.get_ride(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_publish_change_events() {
        let store = MemoryStore::new(16);
        let mut rx = store.subscribe();

        let ride = store.insert_ride(request()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, Table::Rides);
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.row_id, ride.id);
    }

    #[tokio::test]
    async fn decline_markers_are_unique_per_driver_and_ride() {
        let store = MemoryStore::new(16);
        let driver_id = Uuid::new_v4();
        let ride_id = Uuid::new_v4();

        for _ in 0..2 {
            store
                .upsert_decline(DeclineMarker {
                    driver_id,
                    ride_id,
                    declined_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.declines_for(driver_id).await.unwrap().len(), 1);
        assert!(store.declines_for(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn marking_notifications_counts_changed_rows() {
        let store = MemoryStore::new(16);
        let driver_id = Uuid::new_v4();
        let ride_id = Uuid::new_v4();
        store
            .insert_notification(Notification::offer(driver_id, ride_id))
            .await
            .unwrap();

        let changed = store
            .mark_notifications(driver_id, ride_id, NotificationStatus::Read)
            .await
            .unwrap();
        let again = store
            .mark_notifications(driver_id, ride_id, NotificationStatus::Read)
            .await
            .unwrap();

        assert_eq!(changed, 1);
        assert_eq!(again, 0);
        assert!(store
            .notifications_for(driver_id, NotificationStatus::Unread)
            .await
            .unwrap()
            .is_empty());
    }
}
