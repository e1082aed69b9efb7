use crate::geo::Coordinate;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::route::PickupStatus;

/// Client → Server message types (WebSocket)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join { topic: String },
    #[serde(rename = "leave")]
    Leave { topic: String },
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}

/// Typed events multicast to topic members.
///
/// Wire shape: `{"event": "locationUpdate", "data": {...}}` — the event
/// names mirror what the operations console and resident clients listen for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Event {
    LocationUpdate(LocationUpdate),
    ProximityAlert(ProximityAlert),
    PickupStatus(PickupUpdate),
    DriverAssigned(DriverAssigned),
    DriverUnassigned(DriverUnassigned),
    IrregularityAlert(IrregularityAlert),
}

/// A driver's position, fanned out on every accepted report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub driver_id: String,
    pub coordinate: Coordinate,
    pub recorded_at: DateTime<Utc>,
}

/// Fired once per newly-entered proximity band for a (driver, house) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProximityAlert {
    pub driver_id: String,
    pub house_id: String,
    /// The band that was just crossed, in meters.
    pub threshold_m: f64,
    /// Measured distance at the time of the alert, in meters.
    pub distance_m: f64,
    pub timestamp: DateTime<Utc>,
}

/// Pickup disposition change for one house on a driver's daily route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickupUpdate {
    pub house_id: String,
    pub driver_id: String,
    pub status: PickupStatus,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverAssigned {
    pub house_id: String,
    pub driver_id: String,
    pub driver_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverUnassigned {
    pub house_id: String,
    pub driver_id: String,
}

/// Out-of-band condition surfaced to the operations console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IrregularityAlert {
    pub kind: IrregularityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IrregularityKind {
    AssignmentExpired,
    DriverOffline,
}
