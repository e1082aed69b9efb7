//! Daily collection routes and per-house pickup state.
//!
//! A route is built once per driver per calendar day from the assignments
//! current at first fetch. Entries keep their identity for the whole day;
//! disposition changes mutate status in place and fan out to the house and
//! operations topics.

use crate::fleet::FleetStore;
use crate::pubsub::protocol::{Event, PickupUpdate};
use crate::pubsub::{Topic, TopicRouter};
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Pending,
    Picked,
    NotPicked,
}

impl PickupStatus {
    pub fn is_terminal(self) -> bool {
        self != PickupStatus::Pending
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub house_id: String,
    pub pickup_status: PickupStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub driver_id: String,
    pub date: NaiveDate,
    pub entries: Vec<RouteEntry>,
    pub status: RouteStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No route exists for the driver on that date.
    RouteNotFound,
    /// The house is not part of the route.
    EntryNotFound(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::RouteNotFound => write!(f, "no active route for driver today"),
            RouteError::EntryNotFound(house) => {
                write!(f, "house '{}' not found in current route", house)
            }
        }
    }
}

impl std::error::Error for RouteError {}

pub struct RouteTracker {
    router: Arc<TopicRouter>,
    fleet: Arc<FleetStore>,
    routes: DashMap<(String, NaiveDate), Route>,
}

impl RouteTracker {
    pub fn new(router: Arc<TopicRouter>, fleet: Arc<FleetStore>) -> Self {
        Self {
            router,
            fleet,
            routes: DashMap::new(),
        }
    }

    /// Fetch the driver's route for `date`, building it from current
    /// assignments on first fetch. Returns `None` when the driver has no
    /// route and no assignments to build one from.
    ///
    /// Idempotent: one route per (driver, date). Assignments added later in
    /// the day do not grow an already-built route.
    pub fn get_or_create(&self, driver_id: &str, date: NaiveDate) -> Option<Route> {
        match self.routes.entry((driver_id.to_string(), date)) {
            Entry::Occupied(occupied) => Some(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let houses = self.fleet.houses_for_driver(driver_id);
                if houses.is_empty() {
                    return None;
                }
                let route = Route {
                    driver_id: driver_id.to_string(),
                    date,
                    entries: houses
                        .into_iter()
                        .map(|h| RouteEntry {
                            house_id: h.id,
                            pickup_status: PickupStatus::Pending,
                        })
                        .collect(),
                    status: RouteStatus::Pending,
                };
                info!(
                    driver_id = %driver_id,
                    date = %date,
                    stops = route.entries.len(),
                    "Built daily route"
                );
                vacant.insert(route.clone());
                Some(route)
            }
        }
    }

    /// Set the pickup status for one house on the driver's route.
    ///
    /// Re-marking an already-dispositioned entry is allowed (last write
    /// wins) but logged, and the event is re-published so downstream views
    /// converge on the latest state.
    pub fn mark_entry(
        &self,
        driver_id: &str,
        date: NaiveDate,
        house_id: &str,
        status: PickupStatus,
    ) -> Result<Route, RouteError> {
        let mut guard = self
            .routes
            .get_mut(&(driver_id.to_string(), date))
            .ok_or(RouteError::RouteNotFound)?;
        let route = guard.value_mut();

        let entry = route
            .entries
            .iter_mut()
            .find(|e| e.house_id == house_id)
            .ok_or_else(|| RouteError::EntryNotFound(house_id.to_string()))?;

        if entry.pickup_status.is_terminal() {
            warn!(
                driver_id = %driver_id,
                house_id = %house_id,
                previous = ?entry.pickup_status,
                new = ?status,
                "Re-marking an already-dispositioned pickup"
            );
        }
        entry.pickup_status = status;
        route.status = derive_status(&route.entries);

        let updated = route.clone();
        drop(guard);

        info!(
            driver_id = %driver_id,
            house_id = %house_id,
            status = ?status,
            "Pickup status changed"
        );
        let update = PickupUpdate {
            house_id: house_id.to_string(),
            driver_id: driver_id.to_string(),
            status,
            date,
        };
        self.router
            .publish(&Topic::house(house_id), Event::PickupStatus(update.clone()));
        self.router.publish(&Topic::Ops, Event::PickupStatus(update));

        Ok(updated)
    }

    /// The route for (driver, date) if one has been built.
    pub fn get(&self, driver_id: &str, date: NaiveDate) -> Option<Route> {
        self.routes
            .get(&(driver_id.to_string(), date))
            .map(|r| r.clone())
    }
}

fn derive_status(entries: &[RouteEntry]) -> RouteStatus {
    let pending = entries
        .iter()
        .filter(|e| e.pickup_status == PickupStatus::Pending)
        .count();
    if pending == entries.len() {
        RouteStatus::Pending
    } else if pending == 0 {
        RouteStatus::Completed
    } else {
        RouteStatus::InProgress
    }
}
