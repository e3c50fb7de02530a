use std::sync::Arc;

use tokio::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::bridge::{BridgeHandle, RefreshTrigger, spawn_bridge};
use crate::engine::controller::RideController;
use crate::error::RideError;
use crate::observability::metrics::Metrics;
use crate::store::RideStore;

/// Everything that lives between a driver's login and logout.
pub struct DriverSession {
    controller: Arc<RideController>,
    bridge: BridgeHandle,
}

impl DriverSession {
    pub async fn start(
        driver_id: Uuid,
        store: Arc<dyn RideStore>,
        config: &Config,
        metrics: Metrics,
    ) -> Result<Self, RideError> {
        let controller = Arc::new(RideController::new(
            driver_id,
            store.clone(),
            config.clone(),
            metrics,
        ));

        // Subscribe before the first read so no change falls between them.
        let events = store.subscribe();
        controller.refresh_state(RefreshTrigger::Initial).await?;
        controller.restore_trip().await;

        let bridge = spawn_bridge(
            controller.clone(),
            events,
            Duration::from_secs(config.refresh_interval_secs.max(1)),
        );

        info!(driver_id = %driver_id, "driver session started");
        Ok(Self { controller, bridge })
    }

    pub fn controller(&self) -> &Arc<RideController> {
        &self.controller
    }

    pub fn request_refresh(&self) -> bool {
        self.bridge.request_refresh(RefreshTrigger::Manual)
    }

    pub fn logout(mut self) {
        self.controller.close();
        self.bridge.shutdown();
        info!(driver_id = %self.controller.driver_id(), "driver session ended");
    }
}
