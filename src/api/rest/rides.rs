use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::controller::{AcceptOutcome, OtpVerification};
use crate::error::AppError;
use crate::models::fare::{FareBreakdown, FareRule};
use crate::models::ride::{BookingCategory, GeoPoint, Ride, VehicleClass};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/:id", get(get_ride))
        .route("/fare-rules", put(upsert_fare_rule))
        .route("/drivers/:id/rides/:ride_id/accept", post(accept))
        .route("/drivers/:id/rides/:ride_id/decline", post(decline))
        .route("/drivers/:id/rides/:ride_id/arrived", post(arrived))
        .route("/drivers/:id/rides/:ride_id/pickup-otp", post(pickup_otp))
        .route("/drivers/:id/rides/:ride_id/verify-pickup", post(verify_pickup))
        .route("/drivers/:id/rides/:ride_id/drop-otp", post(drop_otp))
        .route("/drivers/:id/rides/:ride_id/verify-drop", post(verify_drop))
        .route("/drivers/:id/rides/:ride_id/complete", post(complete))
        .route("/drivers/:id/rides/:ride_id/cancel", post(cancel))
}

/// Result of a driver action. Expected contention (ride taken, wrong code)
/// comes back as `success: false` with a reason rather than an HTTP error.
#[derive(Debug, Default, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<Ride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fare: Option<FareBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionResponse {
    fn ok(ride: Option<Ride>) -> Self {
        Self {
            success: true,
            ride,
            ..Self::default()
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub customer_id: Uuid,
    pub category: BookingCategory,
    pub vehicle_class: VehicleClass,
    pub pickup: GeoPoint,
    #[serde(default)]
    pub pickup_address: String,
    pub destination: GeoPoint,
    #[serde(default)]
    pub destination_address: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub rental_hours: Option<u32>,
}

#[derive(Deserialize)]
pub struct OtpRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    /// Defaults to the driver issuing the request.
    pub cancelled_by: Option<Uuid>,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let rental_hours = match (payload.category, payload.rental_hours) {
        (BookingCategory::Rental, Some(hours)) if hours > 0 => Some(hours),
        (BookingCategory::Rental, _) => {
            return Err(AppError::BadRequest(
                "rental bookings need rental_hours > 0".to_string(),
            ));
        }
        (_, _) => None,
    };
    if let Some(scheduled_at) = payload.scheduled_at {
        if scheduled_at < Utc::now() {
            return Err(AppError::BadRequest(
                "scheduled_at must be in the future".to_string(),
            ));
        }
    }

    let mut ride = Ride::new_request(
        payload.customer_id,
        payload.category,
        payload.vehicle_class,
        (payload.pickup, payload.pickup_address),
        (payload.destination, payload.destination_address),
    );
    ride.scheduled_at = payload.scheduled_at;
    ride.rental_hours = rental_hours;

    let ride = state.store.insert_ride(ride).await?;
    state.notifier.notify_new_ride(&ride);

    info!(ride_id = %ride.id, category = %ride.category, "ride requested");
    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    let ride = state
        .store
        .get_ride(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;
    Ok(Json(ride))
}

async fn upsert_fare_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<FareRule>,
) -> Result<Json<FareRule>, AppError> {
    if rule.base_fare < 0.0 || rule.per_km_rate < 0.0 || rule.per_minute_rate < 0.0 {
        return Err(AppError::BadRequest("fare rates cannot be negative".to_string()));
    }
    Ok(Json(state.store.upsert_fare_rule(rule).await?))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let response = match controller.accept_ride(ride_id).await? {
        AcceptOutcome::Accepted(ride) => ActionResponse::ok(Some(ride)),
        AcceptOutcome::AlreadyTaken => {
            ActionResponse::rejected("Ride already taken by another driver")
        }
    };
    Ok(Json(response))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    controller.decline_ride(ride_id).await?;
    Ok(Json(ActionResponse::ok(None)))
}

async fn arrived(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let ride = controller.mark_arrived(ride_id).await?;
    Ok(Json(ActionResponse::ok(Some(ride))))
}

async fn pickup_otp(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let code = controller.generate_pickup_otp(ride_id).await?;
    Ok(Json(ActionResponse {
        otp: Some(code),
        ..ActionResponse::ok(None)
    }))
}

async fn verify_pickup(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let response = match controller.verify_pickup_otp(ride_id, &payload.code).await? {
        OtpVerification::Verified(ride) => ActionResponse::ok(Some(ride)),
        OtpVerification::Mismatch => ActionResponse::rejected("Incorrect OTP, please try again"),
    };
    Ok(Json(response))
}

async fn drop_otp(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let code = controller.generate_drop_otp(ride_id).await?;
    Ok(Json(ActionResponse {
        otp: Some(code),
        ..ActionResponse::ok(None)
    }))
}

async fn verify_drop(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let response = match controller.verify_drop_otp(ride_id, &payload.code).await? {
        OtpVerification::Verified(completed) => ActionResponse {
            fare: Some(completed.fare),
            ..ActionResponse::ok(Some(completed.ride))
        },
        OtpVerification::Mismatch => ActionResponse::rejected("Incorrect OTP, please try again"),
    };
    Ok(Json(response))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let completed = controller.complete_ride(ride_id).await?;
    Ok(Json(ActionResponse {
        fare: Some(completed.fare),
        ..ActionResponse::ok(Some(completed.ride))
    }))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((driver_id, ride_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.controller(driver_id)?;
    let cancelled_by = payload.cancelled_by.unwrap_or(driver_id);
    let ride = controller
        .cancel_ride(ride_id, &payload.reason, cancelled_by)
        .await?;
    Ok(Json(ActionResponse::ok(Some(ride))))
}
