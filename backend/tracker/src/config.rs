//! Application configuration loaded from environment variables.

use crate::errors::{Result, TrackerError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) an en-route donation's acceptor location is refreshed
    pub tracking_interval_secs: u64,
    /// How often (in seconds) the nearby-pending view is recomputed for observers
    pub pending_refresh_secs: u64,
    /// Assumed vehicle speed for ETA estimates
    pub tracking_speed_kmh: f64,
    /// Radius used by the nearby-pending view when the caller gives none
    pub default_radius_km: f64,
    /// Optional HTTP feed of acceptor positions; simulated movement when unset
    pub location_feed_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:./foodlink.db".to_string(),
            api_port: 3001,
            tracking_interval_secs: 5,
            pending_refresh_secs: 10,
            tracking_speed_kmh: 20.0,
            default_radius_km: 50.0,
            location_feed_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        let config = Config {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            api_port: parse_or("API_PORT", defaults.api_port)?,
            tracking_interval_secs: parse_or(
                "TRACKING_INTERVAL_SECS",
                defaults.tracking_interval_secs,
            )?,
            pending_refresh_secs: parse_or("PENDING_REFRESH_SECS", defaults.pending_refresh_secs)?,
            tracking_speed_kmh: parse_or("TRACKING_SPEED_KMH", defaults.tracking_speed_kmh)?,
            default_radius_km: parse_or("DEFAULT_RADIUS_KM", defaults.default_radius_km)?,
            location_feed_url: env_var("LOCATION_FEED_URL")
                .ok()
                .filter(|u| !u.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tracking_interval_secs == 0 {
            return Err(TrackerError::Config(
                "TRACKING_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.pending_refresh_secs == 0 {
            return Err(TrackerError::Config(
                "PENDING_REFRESH_SECS must be greater than zero".to_string(),
            ));
        }
        if !(self.tracking_speed_kmh.is_finite() && self.tracking_speed_kmh > 0.0) {
            return Err(TrackerError::Config(
                "TRACKING_SPEED_KMH must be a positive number".to_string(),
            ));
        }
        if !(self.default_radius_km.is_finite() && self.default_radius_km >= 0.0) {
            return Err(TrackerError::Config(
                "DEFAULT_RADIUS_KM must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| TrackerError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TrackerError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_cadence() {
        let config = Config::default();
        assert_eq!(config.tracking_interval_secs, 5);
        assert_eq!(config.pending_refresh_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = Config {
            tracking_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TrackerError::Config(_))));
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let config = Config {
            tracking_speed_kmh: 0.0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TrackerError::Config(_))));
    }
}
