use crate::proximity::DEFAULT_THRESHOLDS_M;
use chrono::NaiveTime;
use serde::Deserialize;

/// Complete Beacon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub position: PositionConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    /// SQLite database file for the GPS log. ":memory:" is supported.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "beacon-gps.db".to_string()
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    /// Notification bands in meters, outermost first.
    #[serde(default = "default_thresholds")]
    pub thresholds_m: Vec<f64>,
}

fn default_thresholds() -> Vec<f64> {
    DEFAULT_THRESHOLDS_M.to_vec()
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            thresholds_m: default_thresholds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Daily run time on the local clock.
    #[serde(default = "default_run_at")]
    pub run_at: NaiveTime,
    /// How long a fresh assignment stays valid.
    #[serde(default = "default_validity_days")]
    pub assignment_validity_days: i64,
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_run_at() -> NaiveTime {
    NaiveTime::from_hms_opt(2, 0, 0).unwrap()
}

fn default_validity_days() -> i64 {
    30
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            run_at: default_run_at(),
            assignment_validity_days: default_validity_days(),
        }
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            position: PositionConfig::default(),
            proximity: ProximityConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<BeaconConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: BeaconConfig = toml::from_str(&contents)?;
    Ok(config)
}
