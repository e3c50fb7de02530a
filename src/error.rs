use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ride::{BookingCategory, RideStatus, VehicleClass};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate row: {0}")]
    Duplicate(String),
}

/// How a failure should be presented to the driver.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Contention,
    Connectivity,
    Precondition,
    Logic,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RideError {
    #[error("ride {0} not found")]
    RideNotFound(Uuid),

    #[error("driver {0} not found")]
    DriverNotFound(Uuid),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("cannot {operation} a ride that is {current}")]
    InvalidState {
        operation: &'static str,
        current: RideStatus,
    },

    #[error("no fare rule for {category} / {vehicle_class}")]
    MissingFareRule {
        category: BookingCategory,
        vehicle_class: VehicleClass,
    },

    #[error("driver session is closed")]
    SessionClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RideError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RideError::Store(StoreError::Unavailable(_)) => ErrorKind::Connectivity,
            RideError::Store(StoreError::Duplicate(_)) => ErrorKind::Contention,
            RideError::InvalidState { .. } => ErrorKind::Contention,
            RideError::RideNotFound(_)
            | RideError::DriverNotFound(_)
            | RideError::Precondition(_)
            | RideError::MissingFareRule { .. } => ErrorKind::Precondition,
            RideError::SessionClosed => ErrorKind::Logic,
        }
    }

    /// Inline text for the driver. Store details stay in the logs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Connectivity => "Connection problem, please try again".to_string(),
            ErrorKind::Logic => "Please sign in again".to_string(),
            ErrorKind::Contention | ErrorKind::Precondition => self.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RideError> for AppError {
    fn from(err: RideError) -> Self {
        let message = err.user_message();
        match err {
            RideError::RideNotFound(_) | RideError::DriverNotFound(_) => AppError::NotFound(message),
            RideError::SessionClosed => AppError::NotFound(message),
            RideError::Precondition(_) | RideError::MissingFareRule { .. } => {
                AppError::Precondition(message)
            }
            RideError::InvalidState { .. } => AppError::Conflict(message),
            RideError::Store(StoreError::Duplicate(_)) => AppError::Conflict(message),
            RideError::Store(StoreError::Unavailable(_)) => AppError::Unavailable(message),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        RideError::from(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Precondition(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "precondition", msg.clone())
            }
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone())
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{ErrorKind, RideError, StoreError};
    use crate::models::ride::RideStatus;

    #[test]
    fn store_outage_hides_details_from_driver() {
        let err = RideError::Store(StoreError::Unavailable("connection reset".to_string()));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(!err.user_message().contains("connection reset"));
    }

    #[test]
    fn precondition_and_state_errors_are_distinct_from_store_errors() {
        let missing = RideError::Precondition("incomplete profile: phone".to_string());
        let stale = RideError::InvalidState {
            operation: "complete",
            current: RideStatus::Cancelled,
        };
        assert_eq!(missing.kind(), ErrorKind::Precondition);
        assert_eq!(stale.kind(), ErrorKind::Contention);
        assert_eq!(RideError::RideNotFound(Uuid::nil()).kind(), ErrorKind::Precondition);
        assert_eq!(RideError::SessionClosed.kind(), ErrorKind::Logic);
    }

    #[test]
    fn invalid_state_message_names_operation_and_status() {
        let err = RideError::InvalidState {
            operation: "mark arrived for",
            current: RideStatus::InProgress,
        };
        assert_eq!(err.to_string(), "cannot mark arrived for a ride that is in_progress");
    }
}
