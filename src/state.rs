use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::controller::RideController;
use crate::engine::queue::{DispatchJob, OfferNotifier, QueueNotifier};
use crate::engine::session::DriverSession;
use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::store::RideStore;

pub struct AppState {
    pub store: Arc<dyn RideStore>,
    pub sessions: DashMap<Uuid, DriverSession>,
    pub notifier: Arc<dyn OfferNotifier>,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RideStore>) -> (Self, mpsc::Receiver<DispatchJob>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size.max(1));

        (
            Self {
                store,
                sessions: DashMap::new(),
                notifier: Arc::new(QueueNotifier::new(dispatch_tx.clone())),
                dispatch_tx,
                metrics: Metrics::new(),
                config,
            },
            dispatch_rx,
        )
    }

    /// Controller of the driver's live session. The map guard is released
    /// before returning so callers can await freely.
    pub fn controller(&self, driver_id: Uuid) -> Result<Arc<RideController>, AppError> {
        match self.sessions.get(&driver_id) {
            Some(session) => Ok(session.controller().clone()),
            None => {
                warn!(driver_id = %driver_id, "request without an active driver session");
                Err(AppError::NotFound(format!(
                    "no active session for driver {driver_id}"
                )))
            }
        }
    }
}
