use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::models::ride::Ride;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchJob {
    pub ride_id: Uuid,
    pub attempt: u32,
}

/// Outbound "a new unassigned ride exists" signal. Fire-and-forget: ride
/// creation never waits on or fails because of it.
pub trait OfferNotifier: Send + Sync {
    fn notify_new_ride(&self, ride: &Ride);
}

#[derive(Clone)]
pub struct QueueNotifier {
    tx: mpsc::Sender<DispatchJob>,
}

impl QueueNotifier {
    pub fn new(tx: mpsc::Sender<DispatchJob>) -> Self {
        Self { tx }
    }
}

impl OfferNotifier for QueueNotifier {
    fn notify_new_ride(&self, ride: &Ride) {
        if ride.driver_id.is_some() {
            return;
        }
        let job = DispatchJob {
            ride_id: ride.id,
            attempt: 0,
        };
        if let Err(err) = self.tx.try_send(job) {
            warn!(ride_id = %ride.id, error = %err, "offer dispatch not queued");
        }
    }
}
