use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::bridge::RefreshTrigger;
use crate::engine::controller::DriverSnapshot;
use crate::engine::session::DriverSession;
use crate::error::AppError;
use crate::models::driver::{Availability, Driver, DriverProfile, Vehicle};
use crate::models::ride::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/session", post(start_session).delete(end_session))
        .route("/drivers/:id/snapshot", get(get_snapshot))
        .route("/drivers/:id/refresh", post(refresh))
        .route("/drivers/:id/online", post(go_online))
        .route("/drivers/:id/offline", post(go_offline))
        .route("/drivers/:id/location", post(update_location))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub phone: String,
    pub vehicle: Option<Vehicle>,
    #[serde(default)]
    pub verified: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("full_name cannot be empty".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        user_id: payload.user_id.unwrap_or_else(Uuid::new_v4),
        profile: DriverProfile {
            full_name: payload.full_name,
            phone: payload.phone,
        },
        vehicle: payload.vehicle,
        availability: Availability::Offline,
        verified: payload.verified,
        location: payload.location,
        updated_at: Utc::now(),
    };

    let driver = state.store.upsert_driver(driver).await?;
    Ok(Json(driver))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .store
        .get_driver(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;
    Ok(Json(driver))
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSnapshot>, AppError> {
    let session = DriverSession::start(
        id,
        state.store.clone(),
        &state.config,
        state.metrics.clone(),
    )
    .await?;
    let snapshot = session.controller().snapshot();

    if let Some(previous) = state.sessions.insert(id, session) {
        previous.logout();
    }
    Ok(Json(snapshot))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let (_, session) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("no active session for driver {id}")))?;
    session.logout();
    Ok(StatusCode::NO_CONTENT)
}

async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSnapshot>, AppError> {
    let controller = state.controller(id)?;
    Ok(Json(controller.snapshot()))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverSnapshot>, AppError> {
    let controller = state.controller(id)?;
    let snapshot = controller.refresh_state(RefreshTrigger::Manual).await?;
    Ok(Json(snapshot))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let controller = state.controller(id)?;
    Ok(Json(controller.go_online().await?))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let controller = state.controller(id)?;
    Ok(Json(controller.go_offline().await?))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<StatusCode, AppError> {
    let controller = state.controller(id)?;
    controller.record_location(payload.location).await?;
    Ok(StatusCode::NO_CONTENT)
}
