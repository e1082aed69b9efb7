//! Append-only GPS log backed by SQLite.
//!
//! Every accepted position report is persisted before any fanout happens;
//! the log is the durable source of truth for "where was this driver last".

use crate::geo::{Coordinate, InvalidCoordinate};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// A single position report. Immutable once logged.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
    /// UUIDv7 identifier (time-ordered)
    pub id: Uuid,
    pub driver_id: String,
    pub coordinate: Coordinate,
    pub recorded_at: DateTime<Utc>,
}

/// Caller-side input for an append. Id and timestamp are assigned by the
/// log when omitted.
#[derive(Clone, Debug)]
pub struct NewPositionReport {
    pub driver_id: String,
    pub coordinate: Coordinate,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Append failures
#[derive(Debug)]
pub enum AppendError {
    InvalidCoordinate(InvalidCoordinate),
    Storage(anyhow::Error),
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::InvalidCoordinate(e) => write!(f, "invalid coordinate: {}", e),
            AppendError::Storage(e) => write!(f, "storage failure: {}", e),
        }
    }
}

impl std::error::Error for AppendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppendError::InvalidCoordinate(e) => Some(e),
            AppendError::Storage(e) => Some(e.as_ref()),
        }
    }
}

impl From<InvalidCoordinate> for AppendError {
    fn from(e: InvalidCoordinate) -> Self {
        AppendError::InvalidCoordinate(e)
    }
}

/// Append-only position log backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE gps_log (
///     id TEXT PRIMARY KEY,
///     driver_id TEXT NOT NULL,
///     lat REAL NOT NULL,
///     lon REAL NOT NULL,
///     recorded_at TEXT NOT NULL   -- RFC 3339, fixed-width microseconds
/// );
/// ```
///
/// # Thread safety
/// The connection is wrapped in a Mutex; SQLite's serialized mode orders
/// concurrent appends, which is all the ordering the log guarantees.
pub struct PositionLog {
    conn: Mutex<Connection>,
}

impl PositionLog {
    /// Open or create a log at `db_path`. `:memory:` is supported for tests.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open GPS log database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS gps_log (
                id TEXT PRIMARY KEY,
                driver_id TEXT NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create gps_log table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_driver_recorded ON gps_log(driver_id, recorded_at)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Validate and persist a report, assigning id and server timestamp when
    /// the caller omitted them. Returns the stored report.
    pub fn append(&self, new: NewPositionReport) -> Result<PositionReport, AppendError> {
        new.coordinate.validate()?;

        let report = PositionReport {
            id: Uuid::now_v7(),
            driver_id: new.driver_id,
            coordinate: new.coordinate,
            recorded_at: new.recorded_at.unwrap_or_else(Utc::now),
        };

        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO gps_log (id, driver_id, lat, lon, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    report.id.to_string(),
                    report.driver_id,
                    report.coordinate.lat,
                    report.coordinate.lon,
                    report
                        .recorded_at
                        .to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )
            .map_err(|e| AppendError::Storage(anyhow::Error::new(e).context("Failed to insert GPS report")))?;

        Ok(report)
    }

    /// The most recent report for a driver, or `None` if the driver has
    /// never reported. Insertion order breaks recorded-time ties.
    pub fn latest(&self, driver_id: &str) -> Result<Option<PositionReport>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                r#"
                SELECT id, driver_id, lat, lon, recorded_at
                FROM gps_log
                WHERE driver_id = ?1
                ORDER BY recorded_at DESC, rowid DESC
                LIMIT 1
                "#,
                params![driver_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query latest report")?;

        row.map(|(id, driver_id, lat, lon, recorded_at)| {
            Ok(PositionReport {
                id: id.parse().context("Malformed report id in log")?,
                driver_id,
                coordinate: Coordinate { lat, lon },
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .context("Malformed timestamp in log")?
                    .with_timezone(&Utc),
            })
        })
        .transpose()
    }

    /// Total number of logged reports (all drivers).
    pub fn len(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM gps_log", [], |row| row.get(0))
            .context("Failed to count reports")?;
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
