//! Fleet records: drivers, houses, and the driver↔house assignments that
//! drive routing, proximity, and fanout entitlement.
//!
//! An assignment lives on the house record (a house has at most one driver
//! at a time). Bulk assign/unassign operates on a selector: one house, or
//! every house in a block and/or sector.

use crate::geo::Coordinate;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub driver_id: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct House {
    pub id: String,
    pub house_no: String,
    pub block: String,
    pub sector: String,
    pub coordinate: Coordinate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,
}

/// Which houses an operations action applies to.
#[derive(Clone, Debug)]
pub enum HouseSelector {
    House(String),
    /// Houses matching block and/or sector. At least one must be set.
    Area {
        block: Option<String>,
        sector: Option<String>,
    },
}

impl HouseSelector {
    fn matches(&self, house: &House) -> bool {
        match self {
            HouseSelector::House(id) => house.id == *id,
            HouseSelector::Area { block, sector } => {
                block.as_ref().map_or(true, |b| house.block == *b)
                    && sector.as_ref().map_or(true, |s| house.sector == *s)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FleetError {
    DriverNotFound(String),
    HouseNotFound(String),
    /// Area selector with neither block nor sector.
    EmptySelector,
    /// Selector matched no houses (or none with a matching assignment).
    NoMatch,
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetError::DriverNotFound(id) => write!(f, "driver '{}' not found", id),
            FleetError::HouseNotFound(id) => write!(f, "house '{}' not found", id),
            FleetError::EmptySelector => {
                write!(f, "either block or sector must be provided")
            }
            FleetError::NoMatch => write!(f, "no houses matched the selector"),
        }
    }
}

impl std::error::Error for FleetError {}

/// A cleared assignment, returned so callers can fan out unassignment events.
#[derive(Clone, Debug)]
pub struct ClearedAssignment {
    pub house: House,
    pub driver_id: String,
}

/// In-memory fleet store.
pub struct FleetStore {
    drivers: DashMap<String, Driver>,
    houses: DashMap<String, House>,
}

impl FleetStore {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
            houses: DashMap::new(),
        }
    }

    pub fn upsert_driver(&self, driver: Driver) {
        self.drivers.insert(driver.id.clone(), driver);
    }

    pub fn get_driver(&self, id: &str) -> Option<Driver> {
        self.drivers.get(id).map(|d| d.clone())
    }

    pub fn upsert_house(&self, house: House) {
        self.houses.insert(house.id.clone(), house);
    }

    pub fn get_house(&self, id: &str) -> Option<House> {
        self.houses.get(id).map(|h| h.clone())
    }

    /// Assign a driver to every house matched by the selector, stamping the
    /// assignment window. An existing assignment is overwritten. Returns the
    /// updated houses.
    pub fn assign(
        &self,
        selector: &HouseSelector,
        driver_id: &str,
        valid_for: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<House>, FleetError> {
        self.check_selector(selector)?;
        if !self.drivers.contains_key(driver_id) {
            return Err(FleetError::DriverNotFound(driver_id.to_string()));
        }

        let mut affected = Vec::new();
        for mut entry in self.houses.iter_mut() {
            if selector.matches(entry.value()) {
                entry.value_mut().assignment = Some(Assignment {
                    driver_id: driver_id.to_string(),
                    assigned_at: now,
                    expires_at: now + valid_for,
                });
                affected.push(entry.value().clone());
            }
        }

        if affected.is_empty() {
            if let HouseSelector::House(id) = selector {
                return Err(FleetError::HouseNotFound(id.clone()));
            }
            return Err(FleetError::NoMatch);
        }
        Ok(affected)
    }

    /// Clear assignments matched by the selector.
    ///
    /// For an area selector only houses currently assigned to `driver_id`
    /// are touched; for a single house any assignment is cleared.
    pub fn unassign(
        &self,
        selector: &HouseSelector,
        driver_id: Option<&str>,
    ) -> Result<Vec<ClearedAssignment>, FleetError> {
        self.check_selector(selector)?;
        if matches!(selector, HouseSelector::Area { .. }) && driver_id.is_none() {
            return Err(FleetError::EmptySelector);
        }

        let mut cleared = Vec::new();
        for mut entry in self.houses.iter_mut() {
            if !selector.matches(entry.value()) {
                continue;
            }
            let Some(assignment) = entry.value().assignment.as_ref() else {
                continue;
            };
            if let Some(want) = driver_id {
                if assignment.driver_id != want {
                    continue;
                }
            }
            let former = assignment.driver_id.clone();
            entry.value_mut().assignment = None;
            cleared.push(ClearedAssignment {
                house: entry.value().clone(),
                driver_id: former,
            });
        }

        if cleared.is_empty() {
            if let HouseSelector::House(id) = selector {
                if !self.houses.contains_key(id) {
                    return Err(FleetError::HouseNotFound(id.clone()));
                }
            }
            return Err(FleetError::NoMatch);
        }
        Ok(cleared)
    }

    /// Houses currently assigned to a driver. Expiry is not checked here;
    /// expired-but-unswept assignments stay linked until the sweep runs.
    pub fn houses_for_driver(&self, driver_id: &str) -> Vec<House> {
        self.houses
            .iter()
            .filter(|h| {
                h.assignment
                    .as_ref()
                    .is_some_and(|a| a.driver_id == driver_id)
            })
            .map(|h| h.clone())
            .collect()
    }

    /// Snapshot of houses whose assignment expired at or before `now`.
    pub fn expired_assignments(&self, now: DateTime<Utc>) -> Vec<House> {
        self.houses
            .iter()
            .filter(|h| h.assignment.as_ref().is_some_and(|a| a.expires_at <= now))
            .map(|h| h.clone())
            .collect()
    }

    /// Clear one house's assignment, returning the former link if any.
    pub fn clear_assignment(&self, house_id: &str) -> Option<ClearedAssignment> {
        let mut entry = self.houses.get_mut(house_id)?;
        let former = entry.value().assignment.as_ref()?.driver_id.clone();
        entry.value_mut().assignment = None;
        Some(ClearedAssignment {
            house: entry.value().clone(),
            driver_id: former,
        })
    }

    fn check_selector(&self, selector: &HouseSelector) -> Result<(), FleetError> {
        if let HouseSelector::Area {
            block: None,
            sector: None,
        } = selector
        {
            return Err(FleetError::EmptySelector);
        }
        Ok(())
    }
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}
