use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::queue::DispatchJob;
use crate::error::RideError;
use crate::geo::haversine_km;
use crate::models::driver::{Availability, Driver};
use crate::models::notification::{Notification, NotificationStatus};
use crate::models::ride::Ride;
use crate::observability::metrics::Metrics;
use crate::store::RideStore;

const RETRY_DELAY_MS: u64 = 250;

/// Fans new ride requests out to nearby drivers as offer notifications.
/// Stands in for the external matching process.
pub async fn run_offer_dispatcher(
    store: Arc<dyn RideStore>,
    config: Config,
    metrics: Metrics,
    retry_tx: mpsc::Sender<DispatchJob>,
    mut job_rx: mpsc::Receiver<DispatchJob>,
) {
    info!("offer dispatcher started");

    while let Some(job) = job_rx.recv().await {
        match dispatch_offers(store.as_ref(), &config, job).await {
            Ok(0) if job.attempt < config.dispatch_retry_limit => {
                warn!(ride_id = %job.ride_id, attempt = job.attempt, "no eligible drivers; re-queueing ride");
                let retry_tx = retry_tx.clone();
                let next = DispatchJob {
                    attempt: job.attempt + 1,
                    ..job
                };
                tokio::spawn(async move {
                    sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(next.attempt))).await;
                    if retry_tx.send(next).await.is_err() {
                        debug!(ride_id = %next.ride_id, "dispatch queue closed before retry");
                    }
                });
            }
            Ok(0) => {
                warn!(ride_id = %job.ride_id, "no eligible drivers; giving up");
            }
            Ok(sent) => {
                metrics.offers_dispatched_total.inc_by(sent as u64);
                info!(ride_id = %job.ride_id, offers = sent, "ride offered");
            }
            Err(err) => {
                error!(ride_id = %job.ride_id, error = %err, "failed to dispatch offers");
            }
        }
    }

    warn!("offer dispatcher stopped: queue channel closed");
}

/// Sends offers for one ride and returns how many drivers were notified.
pub async fn dispatch_offers(
    store: &dyn RideStore,
    config: &Config,
    job: DispatchJob,
) -> Result<usize, RideError> {
    let Some(ride) = store.get_ride(job.ride_id).await? else {
        warn!(ride_id = %job.ride_id, "ride vanished before dispatch");
        return Ok(0);
    };
    if !ride.is_open_offer() {
        debug!(ride_id = %ride.id, status = %ride.status, "ride no longer open");
        return Ok(0);
    }

    let mut candidates: Vec<(f64, Driver)> = Vec::new();
    for driver in store.list_drivers().await? {
        let Some(distance_km) = offer_distance(&driver, &ride, config.offer_radius_km) else {
            continue;
        };

        let declined = store
            .declines_for(driver.id)
            .await?
            .iter()
            .any(|marker| marker.ride_id == ride.id);
        let already_offered = store
            .notifications_for(driver.id, NotificationStatus::Unread)
            .await?
            .iter()
            .any(|notification| notification.ride_id == ride.id);

        if !declined && !already_offered {
            candidates.push((distance_km, driver));
        }
    }

    candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
    candidates.truncate(config.max_offers_per_ride);

    for (_, driver) in &candidates {
        store
            .insert_notification(Notification::offer(driver.id, ride.id))
            .await?;
    }

    Ok(candidates.len())
}

/// Distance to pickup when `driver` may be offered `ride`.
fn offer_distance(driver: &Driver, ride: &Ride, radius_km: f64) -> Option<f64> {
    let eligible = driver.availability == Availability::Online
        && driver.verified
        && driver.vehicle_class() == Some(ride.vehicle_class);
    if !eligible {
        return None;
    }

    let distance_km = haversine_km(&driver.location?, &ride.pickup);
    (distance_km <= radius_km).then_some(distance_km)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::dispatch_offers;
    use crate::config::Config;
    use crate::engine::queue::DispatchJob;
    use crate::models::driver::{Availability, Driver, DriverProfile, Vehicle};
    use crate::models::notification::{DeclineMarker, NotificationStatus};
    use crate::models::ride::{BookingCategory, GeoPoint, Ride, VehicleClass};
    use crate::store::RideStore;
    use crate::store::memory::MemoryStore;

    fn driver(lat: f64, lng: f64, availability: Availability, class: VehicleClass) -> Driver {
        Driver {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            profile: DriverProfile {
                full_name: "Test Driver".to_string(),
                phone: "9000000000".to_string(),
            },
            vehicle: Some(Vehicle {
                make: "Tata".to_string(),
                model: "Tiago".to_string(),
                registration: "KA05MN0001".to_string(),
                vehicle_class: class,
            }),
            availability,
            verified: true,
            location: Some(GeoPoint { lat, lng }),
            updated_at: Utc::now(),
        }
    }

    fn ride() -> Ride {
        Ride::new_request(
            Uuid::new_v4(),
            BookingCategory::Regular,
            VehicleClass::Mini,
            (GeoPoint { lat: 12.9352, lng: 77.6245 }, "Koramangala".to_string()),
            (GeoPoint { lat: 12.9784, lng: 77.6408 }, "Indiranagar".to_string()),
        )
    }

    async fn offered(store: &MemoryStore, driver: &Driver) -> usize {
        store
            .notifications_for(driver.id, NotificationStatus::Unread)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn offers_only_nearby_online_matching_drivers() {
        let store = MemoryStore::new(64);
        let near = driver(12.9360, 77.6250, Availability::Online, VehicleClass::Mini);
        let far = driver(13.3, 77.9, Availability::Online, VehicleClass::Mini);
        let offline = driver(12.9360, 77.6250, Availability::Offline, VehicleClass::Mini);
        let wrong_class = driver(12.9360, 77.6250, Availability::Online, VehicleClass::Suv);
        for d in [&near, &far, &offline, &wrong_class] {
            store.upsert_driver(d.clone()).await.unwrap();
        }
        let ride = store.insert_ride(ride()).await.unwrap();

        let job = DispatchJob { ride_id: ride.id, attempt: 0 };
        let sent = dispatch_offers(&store, &Config::default(), job).await.unwrap();

        assert_eq!(sent, 1);
        assert_eq!(offered(&store, &near).await, 1);
        assert_eq!(offered(&store, &far).await, 0);
        assert_eq!(offered(&store, &offline).await, 0);
        assert_eq!(offered(&store, &wrong_class).await, 0);
    }

    #[tokio::test]
    async fn drivers_who_declined_are_not_reoffered() {
        let store = MemoryStore::new(64);
        let d = driver(12.9360, 77.6250, Availability::Online, VehicleClass::Mini);
        store.upsert_driver(d.clone()).await.unwrap();
        let ride = store.insert_ride(ride()).await.unwrap();
        store
            .upsert_decline(DeclineMarker {
                driver_id: d.id,
                ride_id: ride.id,
                declined_at: Utc::now(),
            })
            .await
            .unwrap();

        let job = DispatchJob { ride_id: ride.id, attempt: 0 };
        assert_eq!(dispatch_offers(&store, &Config::default(), job).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_dispatch_does_not_duplicate_offers() {
        let store = MemoryStore::new(64);
        let d = driver(12.9360, 77.6250, Availability::Online, VehicleClass::Mini);
        store.upsert_driver(d.clone()).await.unwrap();
        let ride = store.insert_ride(ride()).await.unwrap();

        let job = DispatchJob { ride_id: ride.id, attempt: 0 };
        dispatch_offers(&store, &Config::default(), job).await.unwrap();
        dispatch_offers(&store, &Config::default(), job).await.unwrap();

        assert_eq!(offered(&store, &d).await, 1);
    }

    #[tokio::test]
    async fn nearest_drivers_win_when_capped() {
        let store = MemoryStore::new(64);
        let nearest = driver(12.9353, 77.6246, Availability::Online, VehicleClass::Mini);
        let further = driver(12.9500, 77.6300, Availability::Online, VehicleClass::Mini);
        store.upsert_driver(nearest.clone()).await.unwrap();
        store.upsert_driver(further.clone()).await.unwrap();
        let ride = store.insert_ride(ride()).await.unwrap();

        let config = Config {
            max_offers_per_ride: 1,
            ..Config::default()
        };
        let job = DispatchJob { ride_id: ride.id, attempt: 0 };
        dispatch_offers(&store, &config, job).await.unwrap();

        assert_eq!(offered(&store, &nearest).await, 1);
        assert_eq!(offered(&store, &further).await, 0);
    }
}
