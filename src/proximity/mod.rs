//! Stateful driver↔house proximity detection with multi-level hysteresis.
//!
//! Raw radius membership would re-fire on every report while inside the
//! radius. Instead each (driver, house) pair carries a monotonically
//! tightening watermark: the innermost band already notified. A band fires
//! exactly once per approach, and the watermark re-arms only when the driver
//! fully exits the outermost band.

use crate::fleet::House;
use crate::geo::haversine_m;
use crate::position::PositionReport;
use crate::pubsub::protocol::{Event, ProximityAlert};
use crate::pubsub::{Topic, TopicRouter};
use anyhow::{bail, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Notification bands in meters, outermost first.
pub const DEFAULT_THRESHOLDS_M: [f64; 14] = [
    500.0, 450.0, 400.0, 350.0, 300.0, 250.0, 200.0, 150.0, 100.0, 50.0, 25.0, 20.0, 10.0, 5.0,
];

pub struct ProximityDetector {
    router: Arc<TopicRouter>,
    /// Descending band ladder. Never empty.
    thresholds: Vec<f64>,
    /// Last-notified threshold per (driver, house). `INFINITY` means the
    /// pair is outside all bands ("none"). Entries are created lazily and
    /// removed when the assignment goes away.
    watermarks: DashMap<(String, String), f64>,
}

impl ProximityDetector {
    /// Build a detector over the given band ladder.
    ///
    /// Bands are sorted outermost-first; non-finite or non-positive values
    /// are rejected, as is an empty ladder.
    pub fn new(router: Arc<TopicRouter>, thresholds: Vec<f64>) -> Result<Self> {
        if thresholds.is_empty() {
            bail!("proximity threshold ladder must not be empty");
        }
        if thresholds.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            bail!("proximity thresholds must be positive finite meters");
        }
        let mut thresholds = thresholds;
        thresholds.sort_by(|a, b| b.total_cmp(a));
        thresholds.dedup();

        Ok(Self {
            router,
            thresholds,
            watermarks: DashMap::new(),
        })
    }

    /// Evaluate one position report against the driver's assigned houses.
    ///
    /// Emits at most one `proximityAlert` per house per call — the innermost
    /// newly-crossed band — and returns the alerts that fired.
    pub fn evaluate(&self, report: &PositionReport, houses: &[House]) -> Vec<ProximityAlert> {
        let outermost = self.thresholds[0];
        let mut fired = Vec::new();

        for house in houses {
            let distance = haversine_m(report.coordinate, house.coordinate);
            let key = (report.driver_id.clone(), house.id.clone());

            if distance > outermost {
                // Full exit re-arms the whole ladder for the next approach.
                if let Some(mut watermark) = self.watermarks.get_mut(&key) {
                    *watermark = f64::INFINITY;
                }
                continue;
            }

            // Innermost band containing the measured distance. The ladder is
            // descending, so scan from the tight end.
            let band = self
                .thresholds
                .iter()
                .rev()
                .find(|t| distance <= **t)
                .copied()
                .unwrap_or(outermost);

            let mut watermark = self.watermarks.entry(key).or_insert(f64::INFINITY);
            if band < *watermark {
                *watermark = band;
                drop(watermark);

                let alert = ProximityAlert {
                    driver_id: report.driver_id.clone(),
                    house_id: house.id.clone(),
                    threshold_m: band,
                    distance_m: distance,
                    timestamp: report.recorded_at,
                };
                info!(
                    driver_id = %alert.driver_id,
                    house_id = %alert.house_id,
                    threshold_m = alert.threshold_m,
                    "Proximity band crossed"
                );
                self.router
                    .publish(&Topic::house(&alert.house_id), Event::ProximityAlert(alert.clone()));
                fired.push(alert);
            }
        }

        fired
    }

    /// Drop the watermark for one (driver, house) pair. Called when the
    /// assignment between them is removed so a re-assignment starts fresh.
    pub fn clear_pair(&self, driver_id: &str, house_id: &str) {
        self.watermarks
            .remove(&(driver_id.to_string(), house_id.to_string()));
    }

    /// Drop every watermark involving a house.
    pub fn clear_house(&self, house_id: &str) {
        self.watermarks.retain(|(_, h), _| h != house_id);
    }

    #[cfg(test)]
    pub(crate) fn watermark(&self, driver_id: &str, house_id: &str) -> Option<f64> {
        self.watermarks
            .get(&(driver_id.to_string(), house_id.to_string()))
            .map(|v| *v)
    }
}
