use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tracing::{debug, info, warn};

use crate::engine::controller::RideController;
use crate::error::ErrorKind;
use crate::store::ChangeEvent;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    Initial,
    Push,
    Timer,
    /// The change feed dropped events; reconcile to catch up.
    Lagged,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Initial => "initial",
            RefreshTrigger::Push => "push",
            RefreshTrigger::Timer => "timer",
            RefreshTrigger::Lagged => "lagged",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Queues a refresh. A full queue already holds a pending refresh, so the
/// trigger is folded into it. Returns whether a new refresh was queued.
pub fn request_refresh(tx: &mpsc::Sender<RefreshTrigger>, trigger: RefreshTrigger) -> bool {
    match tx.try_send(trigger) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(trigger = trigger.as_str(), "refresh already pending");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Running producer and consumer tasks for one driver session.
pub struct BridgeHandle {
    refresh_tx: mpsc::Sender<RefreshTrigger>,
    tasks: Vec<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn request_refresh(&self, trigger: RefreshTrigger) -> bool {
        request_refresh(&self.refresh_tx, trigger)
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Wires the change feed and a timer into `refresh_state`.
///
/// Both producers write into a capacity-one queue; a single consumer drains
/// it, so reconciliations never overlap and bursts collapse into one.
pub fn spawn_bridge(
    controller: Arc<RideController>,
    events: broadcast::Receiver<ChangeEvent>,
    period: Duration,
) -> BridgeHandle {
    let (refresh_tx, refresh_rx) = mpsc::channel(1);

    let tasks = vec![
        tokio::spawn(run_push_producer(
            controller.clone(),
            events,
            refresh_tx.clone(),
        )),
        tokio::spawn(run_timer_producer(period, refresh_tx.clone())),
        tokio::spawn(run_refresh_consumer(controller, refresh_rx)),
    ];

    BridgeHandle { refresh_tx, tasks }
}

async fn run_push_producer(
    controller: Arc<RideController>,
    events: broadcast::Receiver<ChangeEvent>,
    refresh_tx: mpsc::Sender<RefreshTrigger>,
) {
    let mut stream = BroadcastStream::new(events);

    while let Some(item) = stream.next().await {
        let trigger = match item {
            Ok(event) if controller.is_relevant(&event) => RefreshTrigger::Push,
            Ok(_) => continue,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(driver_id = %controller.driver_id(), skipped, "change feed lagged");
                RefreshTrigger::Lagged
            }
        };

        if refresh_tx.is_closed() {
            break;
        }
        request_refresh(&refresh_tx, trigger);
    }

    debug!(driver_id = %controller.driver_id(), "push producer stopped");
}

async fn run_timer_producer(period: Duration, refresh_tx: mpsc::Sender<RefreshTrigger>) {
    let period = period.max(Duration::from_millis(10));
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(timer);

    while ticks.next().await.is_some() {
        if refresh_tx.is_closed() {
            break;
        }
        request_refresh(&refresh_tx, RefreshTrigger::Timer);
    }
}

async fn run_refresh_consumer(
    controller: Arc<RideController>,
    mut refresh_rx: mpsc::Receiver<RefreshTrigger>,
) {
    while let Some(trigger) = refresh_rx.recv().await {
        if let Err(err) = controller.refresh_state(trigger).await {
            if err.kind() == ErrorKind::Logic {
                break;
            }
            // Failures are logged by the controller; the next trigger retries.
        }
    }

    info!(driver_id = %controller.driver_id(), "refresh consumer stopped");
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::{RefreshTrigger, request_refresh};

    #[tokio::test]
    async fn pending_refresh_absorbs_further_triggers() {
        let (tx, mut rx) = mpsc::channel(1);

        assert!(request_refresh(&tx, RefreshTrigger::Push));
        assert!(!request_refresh(&tx, RefreshTrigger::Timer));
        assert!(!request_refresh(&tx, RefreshTrigger::Push));

        assert_eq!(rx.recv().await, Some(RefreshTrigger::Push));
        assert!(rx.try_recv().is_err());
        assert!(request_refresh(&tx, RefreshTrigger::Timer));
    }

    #[tokio::test]
    async fn closed_queue_reports_nothing_queued() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!request_refresh(&tx, RefreshTrigger::Manual));
    }
}
