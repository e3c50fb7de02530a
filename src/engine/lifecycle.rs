//! Ride state machine.
//!
//! ```text
//! requested -> accepted -> driver_arrived -> in_progress -> completed
//!                  \______________\_______________\-----> cancelled
//! ```

use serde::{Deserialize, Serialize};

use crate::models::ride::RideStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideEvent {
    Accept,
    MarkArrived,
    VerifyPickup,
    Complete,
    Cancel,
}

impl RideEvent {
    /// Label used in logs, metrics and error text.
    pub fn as_str(self) -> &'static str {
        match self {
            RideEvent::Accept => "accept",
            RideEvent::MarkArrived => "mark_arrived",
            RideEvent::VerifyPickup => "verify_pickup",
            RideEvent::Complete => "complete",
            RideEvent::Cancel => "cancel",
        }
    }

    /// Statuses from which this event may fire.
    pub fn sources(self) -> &'static [RideStatus] {
        match self {
            RideEvent::Accept => &[RideStatus::Requested],
            RideEvent::MarkArrived => &[RideStatus::Accepted],
            RideEvent::VerifyPickup => &[RideStatus::DriverArrived],
            RideEvent::Complete => &[RideStatus::InProgress],
            RideEvent::Cancel => &RideStatus::ACTIVE,
        }
    }

    pub fn target(self) -> RideStatus {
        match self {
            RideEvent::Accept => RideStatus::Accepted,
            RideEvent::MarkArrived => RideStatus::DriverArrived,
            RideEvent::VerifyPickup => RideStatus::InProgress,
            RideEvent::Complete => RideStatus::Completed,
            RideEvent::Cancel => RideStatus::Cancelled,
        }
    }
}

/// Next status for `event` fired in `from`, or `None` when the table has no such edge.
pub fn next_status(from: RideStatus, event: RideEvent) -> Option<RideStatus> {
    event.sources().contains(&from).then(|| event.target())
}

#[cfg(test)]
mod tests {
    use super::{RideEvent, next_status};
    use crate::models::ride::RideStatus;

    #[test]
    fn happy_path_edges() {
        assert_eq!(next_status(RideStatus::Requested, RideEvent::Accept), Some(RideStatus::Accepted));
        assert_eq!(
            next_status(RideStatus::Accepted, RideEvent::MarkArrived),
            Some(RideStatus::DriverArrived)
        );
        assert_eq!(
            next_status(RideStatus::DriverArrived, RideEvent::VerifyPickup),
            Some(RideStatus::InProgress)
        );
        assert_eq!(
            next_status(RideStatus::InProgress, RideEvent::Complete),
            Some(RideStatus::Completed)
        );
    }

    #[test]
    fn cancel_only_from_assigned_non_terminal_states() {
        assert_eq!(next_status(RideStatus::Requested, RideEvent::Cancel), None);
        for status in RideStatus::ACTIVE {
            assert_eq!(next_status(status, RideEvent::Cancel), Some(RideStatus::Cancelled));
        }
    }

    const EVENTS: [RideEvent; 5] = [
        RideEvent::Accept,
        RideEvent::MarkArrived,
        RideEvent::VerifyPickup,
        RideEvent::Complete,
        RideEvent::Cancel,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for event in EVENTS {
            assert_eq!(next_status(RideStatus::Completed, event), None);
            assert_eq!(next_status(RideStatus::Cancelled, event), None);
        }
    }

    #[test]
    fn skipping_a_checkpoint_is_rejected() {
        assert_eq!(next_status(RideStatus::Accepted, RideEvent::VerifyPickup), None);
        assert_eq!(next_status(RideStatus::Accepted, RideEvent::Complete), None);
        assert_eq!(next_status(RideStatus::DriverArrived, RideEvent::Complete), None);
    }

    #[test]
    fn in_progress_can_only_complete_or_cancel() {
        let allowed: Vec<RideEvent> = EVENTS
            .into_iter()
            .filter(|event| next_status(RideStatus::InProgress, *event).is_some())
            .collect();
        assert_eq!(allowed, vec![RideEvent::Complete, RideEvent::Cancel]);
    }
}
