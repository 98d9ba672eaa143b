//! Where acceptor positions come from during tracking.
//!
//! The tracking loop asks a [`LocationSource`] for the acceptor's next
//! position on every tick. Production deployments point
//! [`HttpLocationSource`] at a device feed; without one,
//! [`SimulatedLocationSource`] drives the acceptor towards the pickup point.

use std::time::Duration;

use async_trait::async_trait;
use foodlink_lifecycle::geo::step_towards;
use foodlink_lifecycle::{DonationError, DonationRecord, GeoPoint};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, TrackerError};

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// The acceptor's current position for an en-route donation.
    async fn next_location(&self, donation: &DonationRecord) -> Result<GeoPoint>;
}

/// Moves the acceptor towards the donor at a constant speed.
#[derive(Debug, Clone)]
pub struct SimulatedLocationSource {
    step_km: f64,
}

impl SimulatedLocationSource {
    /// Distance covered per tick at `speed_kmh` with ticks every `interval`.
    pub fn new(speed_kmh: f64, interval: Duration) -> Self {
        Self {
            step_km: speed_kmh * interval.as_secs_f64() / 3600.0,
        }
    }

    pub fn step_km(&self) -> f64 {
        self.step_km
    }
}

#[async_trait]
impl LocationSource for SimulatedLocationSource {
    async fn next_location(&self, donation: &DonationRecord) -> Result<GeoPoint> {
        let from = donation.acceptor_location.ok_or_else(|| {
            DonationError::IntegrityViolation(format!(
                "donation {} is {} without an acceptor location",
                donation.id, donation.status
            ))
        })?;
        Ok(step_towards(&from, &donation.donor_location, self.step_km)?)
    }
}

#[derive(Debug, Deserialize)]
struct FeedPosition {
    lat: f64,
    lng: f64,
}

/// Reads positions from `GET {base_url}/acceptors/{acceptor_id}/location`,
/// which must answer `{ "lat": .., "lng": .. }`.
#[derive(Debug, Clone)]
pub struct HttpLocationSource {
    client: Client,
    base_url: String,
}

impl HttpLocationSource {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, acceptor_id: &str) -> String {
        format!("{}/acceptors/{}/location", self.base_url, acceptor_id)
    }
}

#[async_trait]
impl LocationSource for HttpLocationSource {
    async fn next_location(&self, donation: &DonationRecord) -> Result<GeoPoint> {
        let acceptor_id = donation.acceptor_id.as_deref().ok_or_else(|| {
            TrackerError::Store(format!("donation {} has no acceptor", donation.id))
        })?;
        let url = self.url_for(acceptor_id);
        debug!("Fetching acceptor position from {url}");

        let position: FeedPosition = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let point = GeoPoint::new(position.lat, position.lng);
        point.validate()?;
        Ok(point)
    }
}
