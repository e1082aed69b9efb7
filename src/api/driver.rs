use crate::api::ApiError;
use crate::ingest::IngestGateway;
use crate::position::AppendError;
use crate::route::{PickupStatus, RouteError, RouteTracker};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for the driver-facing surface
#[derive(Clone)]
pub struct DriverAppState {
    pub gateway: Arc<IngestGateway>,
    pub tracker: Arc<RouteTracker>,
}

#[derive(Deserialize)]
struct LocationRequest {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct PickupRequest {
    status: PickupStatus,
}

/// Create the driver-facing router.
///
/// Auth happens upstream; the verified driver identity arrives in the
/// `x-driver-id` header.
pub fn create_driver_router(state: DriverAppState) -> Router {
    Router::new()
        .route("/api/driver/location", post(report_location))
        .route("/api/driver/stop-location", post(stop_location))
        .route("/api/driver/route", get(my_route))
        .route("/api/driver/pickup/:house_id", put(mark_pickup))
        .with_state(Arc::new(state))
}

fn driver_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-driver-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("missing driver identity".to_string()))
}

/// POST /api/driver/location - Ingest one position report
async fn report_location(
    State(state): State<Arc<DriverAppState>>,
    headers: HeaderMap,
    Json(body): Json<LocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = driver_id(&headers)?;

    let report = state
        .gateway
        .report_position(
            &driver,
            crate::geo::Coordinate {
                lat: body.latitude,
                lon: body.longitude,
            },
        )
        .await
        .map_err(|e| match e {
            AppendError::InvalidCoordinate(e) => ApiError::BadRequest(e.to_string()),
            AppendError::Storage(e) => {
                error!(error = %e, driver_id = %driver, "Failed to persist position report");
                ApiError::Internal("failed to store position report".to_string())
            }
        })?;

    Ok((StatusCode::CREATED, Json(report)))
}

/// POST /api/driver/stop-location - Driver opts out of sharing
async fn stop_location(
    State(state): State<Arc<DriverAppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let driver = driver_id(&headers)?;
    state.gateway.stop_sharing(&driver).await;
    Ok(Json(
        serde_json::json!({ "message": "location sharing stopped" }),
    ))
}

/// GET /api/driver/route - Today's route, built on first fetch
async fn my_route(
    State(state): State<Arc<DriverAppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let driver = driver_id(&headers)?;
    let today = Utc::now().date_naive();

    match state.tracker.get_or_create(&driver, today) {
        Some(route) => Ok(Json(route)),
        None => Err(ApiError::NotFound(
            "no route assigned for today".to_string(),
        )),
    }
}

/// PUT /api/driver/pickup/{houseId} - Mark pickup disposition
async fn mark_pickup(
    State(state): State<Arc<DriverAppState>>,
    headers: HeaderMap,
    Path(house_id): Path<String>,
    Json(body): Json<PickupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let driver = driver_id(&headers)?;

    if !body.status.is_terminal() {
        return Err(ApiError::BadRequest(
            "status must be 'picked' or 'not_picked'".to_string(),
        ));
    }

    let today = Utc::now().date_naive();
    let route = state
        .tracker
        .mark_entry(&driver, today, &house_id, body.status)
        .map_err(|e| match e {
            RouteError::RouteNotFound => ApiError::NotFound(e.to_string()),
            RouteError::EntryNotFound(_) => ApiError::NotFound(e.to_string()),
        })?;

    info!(driver_id = %driver, house_id = %house_id, status = ?body.status, "Pickup marked");
    Ok(Json(route))
}
