use anyhow::{Context, Result};
use beacon::api::{
    create_admin_router, create_driver_router, create_ws_router, AdminAppState, DriverAppState,
    WsAppState,
};
use beacon::config::{load_config, BeaconConfig};
use beacon::fleet::FleetStore;
use beacon::ingest::IngestGateway;
use beacon::position::PositionLog;
use beacon::proximity::ProximityDetector;
use beacon::pubsub::TopicRouter;
use beacon::route::RouteTracker;
use beacon::sweeper::ExpirySweeper;
use chrono::Duration;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=info".into()),
        )
        .init();

    let config_path =
        std::env::var("BEACON_CONFIG").unwrap_or_else(|_| "beacon.toml".to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path, "Loaded configuration");
            config
        }
        Err(e) => {
            info!(path = %config_path, error = %e, "No config file, using defaults");
            BeaconConfig::default()
        }
    };

    info!("Beacon starting...");

    let router = Arc::new(TopicRouter::new());
    let fleet = Arc::new(FleetStore::new());
    let log = Arc::new(
        PositionLog::open(&config.position.db_path).context("Failed to open GPS log")?,
    );
    let proximity = Arc::new(
        ProximityDetector::new(Arc::clone(&router), config.proximity.thresholds_m.clone())
            .context("Invalid proximity configuration")?,
    );
    let gateway = Arc::new(IngestGateway::new(
        Arc::clone(&log),
        Arc::clone(&router),
        Arc::clone(&fleet),
        Arc::clone(&proximity),
    ));
    let tracker = Arc::new(RouteTracker::new(Arc::clone(&router), Arc::clone(&fleet)));
    let sweeper = Arc::new(ExpirySweeper::new(
        Arc::clone(&fleet),
        Arc::clone(&router),
        Arc::clone(&proximity),
        config.sweeper.run_at,
    ));

    if config.sweeper.enabled {
        tokio::spawn(Arc::clone(&sweeper).run_loop());
    } else {
        info!("Expiry sweeper disabled");
    }

    let app = create_driver_router(DriverAppState {
        gateway,
        tracker,
    })
    .merge(create_admin_router(AdminAppState {
        fleet,
        router: Arc::clone(&router),
        proximity,
        sweeper,
        assignment_validity: Duration::days(config.sweeper.assignment_validity_days),
    }))
    .merge(create_ws_router(WsAppState { router }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
