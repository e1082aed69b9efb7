// Integration tests for the driver-facing HTTP surface.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use beacon::api::{create_driver_router, DriverAppState};
use beacon::fleet::{Driver, FleetStore, House, HouseSelector};
use beacon::geo::Coordinate;
use beacon::ingest::IngestGateway;
use beacon::position::PositionLog;
use beacon::proximity::{ProximityDetector, DEFAULT_THRESHOLDS_M};
use beacon::pubsub::TopicRouter;
use beacon::route::RouteTracker;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tower::ServiceExt;

struct TestHarness {
    fleet: Arc<FleetStore>,
    state: DriverAppState,
}

fn harness() -> TestHarness {
    let router = Arc::new(TopicRouter::new());
    let fleet = Arc::new(FleetStore::new());
    let log = Arc::new(PositionLog::open(":memory:").unwrap());
    let proximity = Arc::new(
        ProximityDetector::new(Arc::clone(&router), DEFAULT_THRESHOLDS_M.to_vec()).unwrap(),
    );
    let gateway = Arc::new(IngestGateway::new(
        log,
        Arc::clone(&router),
        Arc::clone(&fleet),
        proximity,
    ));
    let tracker = Arc::new(RouteTracker::new(router, Arc::clone(&fleet)));

    TestHarness {
        fleet,
        state: DriverAppState { gateway, tracker },
    }
}

fn app(harness: &TestHarness) -> Router {
    create_driver_router(harness.state.clone())
}

fn seed_assignment(fleet: &FleetStore, driver: &str, house: &str) {
    fleet.upsert_driver(Driver {
        id: driver.to_string(),
        name: "Akram".to_string(),
    });
    fleet.upsert_house(House {
        id: house.to_string(),
        house_no: house.to_string(),
        block: "B1".to_string(),
        sector: "S1".to_string(),
        coordinate: Coordinate { lat: 33.7, lon: 73.0 },
        assignment: None,
    });
    fleet
        .assign(
            &HouseSelector::House(house.to_string()),
            driver,
            Duration::days(30),
            Utc::now(),
        )
        .unwrap();
}

fn json_request(method: &str, uri: &str, driver: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(driver) = driver {
        builder = builder.header("x-driver-id", driver);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_report_location_created() {
    let h = harness();
    let resp = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/driver/location",
            Some("d1"),
            r#"{"latitude": 33.7, "longitude": 73.05}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["driverId"], "d1");
    assert_eq!(json["coordinate"]["lat"], 33.7);
    assert!(json["recordedAt"].is_string());
}

#[tokio::test]
async fn test_report_location_invalid_coordinate() {
    let h = harness();
    let resp = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/driver/location",
            Some("d1"),
            r#"{"latitude": 120.0, "longitude": 73.05}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert!(json["error"].as_str().unwrap().contains("latitude"));
}

#[tokio::test]
async fn test_missing_driver_identity_is_unauthorized() {
    let h = harness();
    let resp = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/driver/location",
            None,
            r#"{"latitude": 33.7, "longitude": 73.05}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_route_fetch_without_assignments_is_404() {
    let h = harness();
    let resp = app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = body_json(resp).await;
    assert_eq!(json["error"], "no route assigned for today");
}

#[tokio::test]
async fn test_route_fetch_builds_and_repeats() {
    let h = harness();
    seed_assignment(&h.fleet, "d1", "h1");

    let resp = app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let first = body_json(resp).await;
    assert_eq!(first["entries"].as_array().unwrap().len(), 1);
    assert_eq!(first["entries"][0]["pickupStatus"], "pending");

    // second fetch returns the identical entry set
    let resp = app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();
    let second = body_json(resp).await;
    assert_eq!(first["entries"], second["entries"]);
}

#[tokio::test]
async fn test_mark_pickup_flow() {
    let h = harness();
    seed_assignment(&h.fleet, "d1", "h1");

    // route must exist before marking
    let resp = app(&h)
        .oneshot(json_request(
            "PUT",
            "/api/driver/pickup/h1",
            Some("d1"),
            r#"{"status": "picked"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(json_request(
            "PUT",
            "/api/driver/pickup/h1",
            Some("d1"),
            r#"{"status": "picked"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["entries"][0]["pickupStatus"], "picked");
    assert_eq!(json["status"], "completed");
}

#[tokio::test]
async fn test_mark_pickup_unknown_house() {
    let h = harness();
    seed_assignment(&h.fleet, "d1", "h1");
    app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(json_request(
            "PUT",
            "/api/driver/pickup/h99",
            Some("d1"),
            r#"{"status": "picked"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mark_pickup_rejects_pending() {
    let h = harness();
    seed_assignment(&h.fleet, "d1", "h1");
    app(&h)
        .oneshot(json_request("GET", "/api/driver/route", Some("d1"), ""))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(json_request(
            "PUT",
            "/api/driver/pickup/h1",
            Some("d1"),
            r#"{"status": "pending"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_location() {
    let h = harness();
    app(&h)
        .oneshot(json_request(
            "POST",
            "/api/driver/location",
            Some("d1"),
            r#"{"latitude": 33.7, "longitude": 73.05}"#,
        ))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(json_request(
            "POST",
            "/api/driver/stop-location",
            Some("d1"),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(h
        .state
        .gateway
        .latest_position("d1")
        .unwrap()
        .is_none());
}
