use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Address the HTTP/WebSocket server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Live tracking configuration
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// External address-lookup service configuration
    #[serde(default)]
    pub geocoding: GeocodingConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

/// Configuration for ETA estimation and alert evaluation.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Assumed average travel speed in km/h used for ETA estimation.
    /// A coarse heuristic, not a measured value; tune per deployment.
    #[serde(default = "TrackingConfig::default_average_speed_kmh")]
    pub average_speed_kmh: f64,
    /// Interval in seconds between ETA/alert re-evaluation cycles (default: 30).
    /// Acts as a correctness backstop when push events are missed.
    #[serde(default = "TrackingConfig::default_eta_refresh_secs")]
    pub eta_refresh_secs: u64,
    /// ETA threshold in minutes below which a crew counts as approaching.
    #[serde(default = "TrackingConfig::default_approach_threshold_minutes")]
    pub approach_threshold_minutes: i64,
    /// Radius in meters of the arrival geofence around a destination.
    #[serde(default = "TrackingConfig::default_arrival_radius_meters")]
    pub arrival_radius_meters: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            average_speed_kmh: Self::default_average_speed_kmh(),
            eta_refresh_secs: Self::default_eta_refresh_secs(),
            approach_threshold_minutes: Self::default_approach_threshold_minutes(),
            arrival_radius_meters: Self::default_arrival_radius_meters(),
        }
    }
}

impl TrackingConfig {
    fn default_average_speed_kmh() -> f64 {
        40.0
    }
    fn default_eta_refresh_secs() -> u64 {
        30
    }
    fn default_approach_threshold_minutes() -> i64 {
        10
    }
    fn default_arrival_radius_meters() -> f64 {
        75.0
    }

    pub fn validate(&self) {
        assert!(
            self.average_speed_kmh > 0.0,
            "tracking.average_speed_kmh must be positive"
        );
        assert!(
            self.eta_refresh_secs > 0,
            "tracking.eta_refresh_secs must be positive"
        );
        assert!(
            self.arrival_radius_meters > 0.0,
            "tracking.arrival_radius_meters must be positive"
        );
        if self.eta_refresh_secs < 5 {
            tracing::warn!(
                eta_refresh_secs = self.eta_refresh_secs,
                "Very short ETA refresh interval; alert evaluation may dominate CPU"
            );
        }
    }
}

/// Configuration for the external address-search service.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    /// Base URL of the Nominatim-compatible service.
    #[serde(default = "GeocodingConfig::default_base_url")]
    pub base_url: String,
    /// Client-identifying User-Agent, required by the service's usage policy.
    #[serde(default = "GeocodingConfig::default_user_agent")]
    pub user_agent: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "GeocodingConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            user_agent: Self::default_user_agent(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl GeocodingConfig {
    fn default_base_url() -> String {
        "https://nominatim.openstreetmap.org".to_string()
    }
    fn default_user_agent() -> String {
        "crewtrack/0.1 (field-crew tracking)".to_string()
    }
    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
