//! Ingestion gateway: the single entry point for driver position traffic.
//!
//! One report fans out three ways: the durable GPS log, a `locationUpdate`
//! multicast (driver topic, ops topic, every assigned house topic), and the
//! proximity detector. Work for the same driver is serialized through a
//! per-driver async lock; different drivers proceed in parallel.

use crate::fleet::FleetStore;
use crate::geo::Coordinate;
use crate::position::{AppendError, NewPositionReport, PositionLog, PositionReport};
use crate::proximity::ProximityDetector;
use crate::pubsub::protocol::{Event, IrregularityAlert, IrregularityKind, LocationUpdate};
use crate::pubsub::{Topic, TopicRouter};
use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct IngestGateway {
    log: Arc<PositionLog>,
    router: Arc<TopicRouter>,
    fleet: Arc<FleetStore>,
    proximity: Arc<ProximityDetector>,
    /// Share opt-in per driver. Absent means "never reported"; false means
    /// the driver explicitly stopped and reads as offline until the next
    /// report.
    sharing: DashMap<String, bool>,
    /// Per-driver serialization (sharded lock keyed by driver id).
    driver_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IngestGateway {
    pub fn new(
        log: Arc<PositionLog>,
        router: Arc<TopicRouter>,
        fleet: Arc<FleetStore>,
        proximity: Arc<ProximityDetector>,
    ) -> Self {
        Self {
            log,
            router,
            fleet,
            proximity,
            sharing: DashMap::new(),
            driver_locks: DashMap::new(),
        }
    }

    async fn lock_driver(&self, driver_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .driver_locks
            .entry(driver_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Accept one position report.
    ///
    /// The report is persisted before anything is published; a failed write
    /// produces no events. On success the location is multicast and the
    /// proximity detector runs over the driver's assigned houses.
    pub async fn report_position(
        &self,
        driver_id: &str,
        coordinate: Coordinate,
    ) -> Result<PositionReport, AppendError> {
        let _guard = self.lock_driver(driver_id).await;

        let report = self.log.append(NewPositionReport {
            driver_id: driver_id.to_string(),
            coordinate,
            recorded_at: None,
        })?;
        self.sharing.insert(driver_id.to_string(), true);

        let update = LocationUpdate {
            driver_id: report.driver_id.clone(),
            coordinate: report.coordinate,
            recorded_at: report.recorded_at,
        };
        self.router.publish(
            &Topic::driver(driver_id),
            Event::LocationUpdate(update.clone()),
        );
        self.router
            .publish(&Topic::Ops, Event::LocationUpdate(update.clone()));

        let houses = self.fleet.houses_for_driver(driver_id);
        for house in &houses {
            self.router.publish(
                &Topic::house(&house.id),
                Event::LocationUpdate(update.clone()),
            );
        }

        self.proximity.evaluate(&report, &houses);

        Ok(report)
    }

    /// Driver opted out of location sharing. Later `latest_position` calls
    /// read as absent until the driver reports again.
    pub async fn stop_sharing(&self, driver_id: &str) {
        let _guard = self.lock_driver(driver_id).await;
        self.sharing.insert(driver_id.to_string(), false);
        info!(driver_id = %driver_id, "Driver stopped sharing location");

        self.router.publish(
            &Topic::Ops,
            Event::IrregularityAlert(IrregularityAlert {
                kind: IrregularityKind::DriverOffline,
                message: format!("driver {} stopped sharing location", driver_id),
                driver_id: Some(driver_id.to_string()),
                house_id: None,
                timestamp: Utc::now(),
            }),
        );
    }

    /// Most recent position, gated by the share flag: a driver who stopped
    /// sharing reads as absent even though log rows exist.
    pub fn latest_position(&self, driver_id: &str) -> Result<Option<PositionReport>> {
        if self.sharing.get(driver_id).is_some_and(|s| !*s) {
            return Ok(None);
        }
        self.log.latest(driver_id)
    }

    pub fn is_sharing(&self, driver_id: &str) -> bool {
        self.sharing.get(driver_id).is_some_and(|s| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{Driver, House, HouseSelector};
    use crate::proximity::DEFAULT_THRESHOLDS_M;
    use chrono::Duration;

    fn gateway_with_fleet() -> (Arc<TopicRouter>, Arc<FleetStore>, IngestGateway) {
        let router = Arc::new(TopicRouter::new());
        let fleet = Arc::new(FleetStore::new());
        let log = Arc::new(PositionLog::open(":memory:").unwrap());
        let proximity = Arc::new(
            ProximityDetector::new(Arc::clone(&router), DEFAULT_THRESHOLDS_M.to_vec()).unwrap(),
        );
        let gateway = IngestGateway::new(
            log,
            Arc::clone(&router),
            Arc::clone(&fleet),
            proximity,
        );
        (router, fleet, gateway)
    }

    fn seed_assignment(fleet: &FleetStore, driver: &str, house: &str, lat: f64, lon: f64) {
        fleet.upsert_driver(Driver {
            id: driver.to_string(),
            name: driver.to_string(),
        });
        fleet.upsert_house(House {
            id: house.to_string(),
            house_no: house.to_string(),
            block: "B1".to_string(),
            sector: "S1".to_string(),
            coordinate: Coordinate { lat, lon },
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

    #[tokio::test]
    async fn test_report_then_latest() {
        let (_router, _fleet, gateway) = gateway_with_fleet();
        let stored = gateway
            .report_position("d1", Coordinate { lat: 33.7, lon: 73.0 })
            .await
            .unwrap();

        let latest = gateway.latest_position("d1").unwrap().unwrap();
        assert_eq!(latest.id, stored.id);
        assert!(gateway.is_sharing("d1"));
    }

    #[tokio::test]
    async fn test_stop_sharing_gates_latest() {
        let (router, _fleet, gateway) = gateway_with_fleet();
        let (sub, tx, mut ops_rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, sub, tx);

        gateway
            .report_position("d1", Coordinate { lat: 33.7, lon: 73.0 })
            .await
            .unwrap();
        gateway.stop_sharing("d1").await;

        assert!(gateway.latest_position("d1").unwrap().is_none());
        assert!(!gateway.is_sharing("d1"));

        // locationUpdate followed by the offline alert
        assert!(matches!(
            ops_rx.try_recv().unwrap(),
            Event::LocationUpdate(_)
        ));
        assert!(matches!(
            ops_rx.try_recv().unwrap(),
            Event::IrregularityAlert(a) if a.kind == IrregularityKind::DriverOffline
        ));
    }

    #[tokio::test]
    async fn test_reporting_resumes_sharing() {
        let (_router, _fleet, gateway) = gateway_with_fleet();
        gateway
            .report_position("d1", Coordinate { lat: 33.7, lon: 73.0 })
            .await
            .unwrap();
        gateway.stop_sharing("d1").await;
        gateway
            .report_position("d1", Coordinate { lat: 33.8, lon: 73.0 })
            .await
            .unwrap();

        let latest = gateway.latest_position("d1").unwrap().unwrap();
        assert!((latest.coordinate.lat - 33.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_invalid_coordinate_publishes_nothing() {
        let (router, _fleet, gateway) = gateway_with_fleet();
        let (sub, tx, mut ops_rx) = TopicRouter::subscriber();
        router.join(Topic::Ops, sub, tx);

        let err = gateway
            .report_position("d1", Coordinate { lat: 95.0, lon: 73.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, AppendError::InvalidCoordinate(_)));
        assert!(ops_rx.try_recv().is_err());
        assert!(gateway.latest_position("d1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fanout_reaches_entitled_topics_only() {
        let (router, fleet, gateway) = gateway_with_fleet();
        seed_assignment(&fleet, "d1", "h1", 33.7, 73.0);
        // h2 belongs to another driver
        seed_assignment(&fleet, "d2", "h2", 33.9, 73.2);

        let (driver_sub, driver_tx, mut driver_rx) = TopicRouter::subscriber();
        let (ops_sub, ops_tx, mut ops_rx) = TopicRouter::subscriber();
        let (h1_sub, h1_tx, mut h1_rx) = TopicRouter::subscriber();
        let (h2_sub, h2_tx, mut h2_rx) = TopicRouter::subscriber();
        router.join(Topic::driver("d1"), driver_sub, driver_tx);
        router.join(Topic::Ops, ops_sub, ops_tx);
        router.join(Topic::house("h1"), h1_sub, h1_tx);
        router.join(Topic::house("h2"), h2_sub, h2_tx);

        gateway
            .report_position("d1", Coordinate { lat: 33.75, lon: 73.0 })
            .await
            .unwrap();

        for rx in [&mut driver_rx, &mut ops_rx, &mut h1_rx] {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Event::LocationUpdate(u) if u.driver_id == "d1"
            ));
        }
        // the other driver's house hears nothing
        assert!(h2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_report_near_house_raises_alert() {
        let (router, fleet, gateway) = gateway_with_fleet();
        seed_assignment(&fleet, "d1", "h1", 0.0, 0.0);

        let (sub, tx, mut h1_rx) = TopicRouter::subscriber();
        router.join(Topic::house("h1"), sub, tx);

        // ~44m north of the house: inside the 50m band
        gateway
            .report_position("d1", Coordinate { lat: 0.0004, lon: 0.0 })
            .await
            .unwrap();

        assert!(matches!(
            h1_rx.try_recv().unwrap(),
            Event::LocationUpdate(_)
        ));
        assert!(matches!(
            h1_rx.try_recv().unwrap(),
            Event::ProximityAlert(a) if a.threshold_m == 50.0
        ));
    }
}
