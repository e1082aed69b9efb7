use crate::api::ApiError;
use crate::fleet::{Driver, FleetError, FleetStore, House, HouseSelector};
use crate::geo::Coordinate;
use crate::proximity::ProximityDetector;
use crate::pubsub::protocol::{DriverAssigned, DriverUnassigned, Event};
use crate::pubsub::{Topic, TopicRouter};
use crate::sweeper::ExpirySweeper;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Shared state for the operations surface
#[derive(Clone)]
pub struct AdminAppState {
    pub fleet: Arc<FleetStore>,
    pub router: Arc<TopicRouter>,
    pub proximity: Arc<ProximityDetector>,
    pub sweeper: Arc<ExpirySweeper>,
    /// Validity window stamped on new assignments.
    pub assignment_validity: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriverRequest {
    id: Option<String>,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HouseRequest {
    id: Option<String>,
    house_no: String,
    block: String,
    sector: String,
    latitude: f64,
    longitude: f64,
}

/// Selector payload shared by assign and unassign: one house, or every
/// house in a block and/or sector.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentRequest {
    driver_id: String,
    house_id: Option<String>,
    block: Option<String>,
    sector: Option<String>,
}

#[derive(Serialize)]
struct AssignResponse {
    assigned: usize,
}

#[derive(Serialize)]
struct UnassignResponse {
    unassigned: usize,
}

#[derive(Serialize)]
struct SweepResponse {
    expired: usize,
}

/// Create the operations router
pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/api/admin/drivers", post(create_driver))
        .route("/api/admin/houses", post(create_house))
        .route("/api/admin/assign", post(assign_driver))
        .route("/api/admin/unassign", post(unassign_driver))
        .route("/api/admin/sweep", post(trigger_sweep))
        .with_state(Arc::new(state))
}

impl AssignmentRequest {
    fn selector(&self) -> Result<HouseSelector, ApiError> {
        match (&self.house_id, &self.block, &self.sector) {
            (Some(id), None, None) => Ok(HouseSelector::House(id.clone())),
            (None, block, sector) if block.is_some() || sector.is_some() => {
                Ok(HouseSelector::Area {
                    block: block.clone(),
                    sector: sector.clone(),
                })
            }
            _ => Err(ApiError::BadRequest(
                "provide either houseId, or block and/or sector".to_string(),
            )),
        }
    }
}

fn fleet_error(e: FleetError) -> ApiError {
    match e {
        FleetError::DriverNotFound(_) | FleetError::HouseNotFound(_) | FleetError::NoMatch => {
            ApiError::NotFound(e.to_string())
        }
        FleetError::EmptySelector => ApiError::BadRequest(e.to_string()),
    }
}

/// POST /api/admin/drivers - Register a driver
async fn create_driver(
    State(state): State<Arc<AdminAppState>>,
    Json(body): Json<DriverRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let driver = Driver {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: body.name,
    };
    state.fleet.upsert_driver(driver.clone());
    Ok((StatusCode::CREATED, Json(driver)))
}

/// POST /api/admin/houses - Register a house
async fn create_house(
    State(state): State<Arc<AdminAppState>>,
    Json(body): Json<HouseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let coordinate = Coordinate::new(body.latitude, body.longitude)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let house = House {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        house_no: body.house_no,
        block: body.block,
        sector: body.sector,
        coordinate,
        assignment: None,
    };
    state.fleet.upsert_house(house.clone());
    Ok((StatusCode::CREATED, Json(house)))
}

/// POST /api/admin/assign - Assign a driver to a house or area
async fn assign_driver(
    State(state): State<Arc<AdminAppState>>,
    Json(body): Json<AssignmentRequest>,
) -> Result<Json<AssignResponse>, ApiError> {
    let selector = body.selector()?;
    let driver = state
        .fleet
        .get_driver(&body.driver_id)
        .ok_or_else(|| ApiError::NotFound(format!("driver '{}' not found", body.driver_id)))?;

    let affected = state
        .fleet
        .assign(&selector, &driver.id, state.assignment_validity, Utc::now())
        .map_err(fleet_error)?;

    info!(
        driver_id = %driver.id,
        houses = affected.len(),
        "Driver assigned"
    );

    for house in &affected {
        let assignment = house.assignment.as_ref().ok_or_else(|| {
            ApiError::Internal("assignment missing after assign".to_string())
        })?;
        let event = Event::DriverAssigned(DriverAssigned {
            house_id: house.id.clone(),
            driver_id: driver.id.clone(),
            driver_name: driver.name.clone(),
            expires_at: assignment.expires_at,
        });
        state.router.publish(&Topic::house(&house.id), event.clone());
        state.router.publish(&Topic::driver(&driver.id), event.clone());
        state.router.publish(&Topic::Ops, event);
    }

    Ok(Json(AssignResponse {
        assigned: affected.len(),
    }))
}

/// POST /api/admin/unassign - Clear assignments for a house or area
async fn unassign_driver(
    State(state): State<Arc<AdminAppState>>,
    Json(body): Json<AssignmentRequest>,
) -> Result<Json<UnassignResponse>, ApiError> {
    let selector = body.selector()?;
    let driver_scope = match selector {
        // area unassign only touches houses held by the named driver
        HouseSelector::Area { .. } => Some(body.driver_id.as_str()),
        HouseSelector::House(_) => None,
    };

    let cleared = state
        .fleet
        .unassign(&selector, driver_scope)
        .map_err(fleet_error)?;

    info!(
        driver_id = %body.driver_id,
        houses = cleared.len(),
        "Driver unassigned"
    );

    for item in &cleared {
        state.proximity.clear_pair(&item.driver_id, &item.house.id);
        let event = Event::DriverUnassigned(DriverUnassigned {
            house_id: item.house.id.clone(),
            driver_id: item.driver_id.clone(),
        });
        state
            .router
            .publish(&Topic::house(&item.house.id), event.clone());
        state
            .router
            .publish(&Topic::driver(&item.driver_id), event.clone());
        state.router.publish(&Topic::Ops, event);
    }

    Ok(Json(UnassignResponse {
        unassigned: cleared.len(),
    }))
}

/// POST /api/admin/sweep - Manually trigger the expiry sweep
async fn trigger_sweep(
    State(state): State<Arc<AdminAppState>>,
) -> Result<Json<SweepResponse>, ApiError> {
    match state.sweeper.try_sweep(Utc::now()) {
        Some(expired) => Ok(Json(SweepResponse { expired })),
        None => Err(ApiError::Conflict("sweep already in progress".to_string())),
    }
}
