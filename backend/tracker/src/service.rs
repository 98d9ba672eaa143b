//! Command and read façade used by the REST layer.
//!
//! Every command goes through the store's atomic update with
//! [`lifecycle::apply`] as the mutator, then adjusts the tracking scheduler
//! to the donation's new status: starting a pickup starts tracking,
//! completing or cancelling stops it.

use std::sync::Arc;

use chrono::Utc;
use foodlink_lifecycle::lifecycle;
use foodlink_lifecycle::projections::{self, NearbyDonation, TrackingView};
use foodlink_lifecycle::{
    DonationEvent, DonationId, DonationPatch, DonationRecord, DonationStatus, GeoPoint,
    NewDonation,
};
use serde::Deserialize;
use tracing::info;

use crate::errors::Result;
use crate::scheduler::{PendingWatch, TrackingScheduler};
use crate::store::DonationStore;

/// Input of [`DonationService::create_donation`].
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDonation {
    pub donor_id: String,
    #[serde(default)]
    pub donor_name: Option<String>,
    pub food_type: String,
    pub quantity: u32,
    #[serde(default)]
    pub unit: Option<String>,
    pub expires_in_hours: u32,
    #[serde(default)]
    pub location_text: String,
    pub coords: GeoPoint,
}

pub struct DonationService {
    store: Arc<dyn DonationStore>,
    scheduler: Arc<TrackingScheduler>,
    speed_kmh: f64,
}

impl DonationService {
    pub fn new(
        store: Arc<dyn DonationStore>,
        scheduler: Arc<TrackingScheduler>,
        speed_kmh: f64,
    ) -> Self {
        Self {
            store,
            scheduler,
            speed_kmh,
        }
    }

    pub fn scheduler(&self) -> &Arc<TrackingScheduler> {
        &self.scheduler
    }

    // ─────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────

    pub async fn create_donation(&self, input: CreateDonation) -> Result<DonationRecord> {
        let new = NewDonation::new(
            input.donor_id,
            input.donor_name,
            input.food_type,
            input.quantity,
            input.unit,
            input.expires_in_hours,
            input.location_text,
            input.coords,
            Utc::now(),
        )?;
        let record = self.store.create(new).await?;
        info!(
            "Donation {} created by {}: {} x{} {}",
            record.id, record.donor_id, record.food_type, record.quantity, record.unit
        );
        self.scheduler.publish(&record);
        Ok(record)
    }

    pub async fn accept_donation(
        &self,
        id: DonationId,
        acceptor_id: String,
        acceptor_name: String,
        coords: GeoPoint,
    ) -> Result<DonationRecord> {
        self.transition(
            id,
            DonationEvent::Accept {
                acceptor_id,
                acceptor_name,
                location: coords,
            },
        )
        .await
    }

    pub async fn start_pickup(&self, id: DonationId) -> Result<DonationRecord> {
        let record = self.transition(id, DonationEvent::StartPickup).await?;
        self.scheduler.start_tracking(id);
        Ok(record)
    }

    /// Acceptor-pushed position, for clients that report their own location.
    pub async fn update_location(&self, id: DonationId, coords: GeoPoint) -> Result<DonationRecord> {
        self.transition(id, DonationEvent::UpdateLocation(coords))
            .await
    }

    pub async fn complete_pickup(&self, id: DonationId) -> Result<DonationRecord> {
        let record = self.transition(id, DonationEvent::Complete).await?;
        self.scheduler.stop_tracking(id);
        Ok(record)
    }

    pub async fn cancel_donation(&self, id: DonationId) -> Result<DonationRecord> {
        let record = self.transition(id, DonationEvent::Cancel).await?;
        self.scheduler.stop_tracking(id);
        Ok(record)
    }

    pub async fn edit_donation(
        &self,
        id: DonationId,
        donor_id: String,
        patch: DonationPatch,
    ) -> Result<DonationRecord> {
        self.transition(id, DonationEvent::EditDetails { donor_id, patch })
            .await
    }

    /// Stop polling the acceptor's position without changing the donation.
    pub fn pause_tracking(&self, id: DonationId) -> bool {
        self.scheduler.stop_tracking(id)
    }

    /// Restart polling for a donation that is still en route.
    pub async fn resume_tracking(&self, id: DonationId) -> Result<bool> {
        let record = self.store.get(id).await?;
        if record.status != DonationStatus::EnRoute {
            return Ok(false);
        }
        Ok(self.scheduler.start_tracking(id))
    }

    /// Restart tracking loops for every en-route donation, e.g. after a restart.
    pub async fn resume_all_tracking(&self) -> Result<usize> {
        let en_route = self.store.list_by_status(DonationStatus::EnRoute).await?;
        let started = en_route
            .iter()
            .filter(|r| self.scheduler.start_tracking(r.id))
            .count();
        if started > 0 {
            info!("Resumed tracking for {started} en-route donations");
        }
        Ok(started)
    }

    async fn transition(&self, id: DonationId, event: DonationEvent) -> Result<DonationRecord> {
        let kind = event.kind();
        let record = self
            .store
            .update(
                id,
                Box::new(move |r: &mut DonationRecord| lifecycle::apply(r, event)),
            )
            .await?;
        info!(
            "Donation {id}: {kind} -> {} (revision {})",
            record.status, record.revision
        );
        self.scheduler.publish(&record);
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    pub async fn get_donation(&self, id: DonationId) -> Result<DonationRecord> {
        self.store.get(id).await
    }

    pub async fn list_mine(&self, donor_id: &str) -> Result<Vec<DonationRecord>> {
        let all = self.store.list_all().await?;
        Ok(projections::mine(&all, donor_id))
    }

    pub async fn list_pending_near(
        &self,
        coords: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDonation>> {
        let pending = self.store.list_by_status(DonationStatus::Pending).await?;
        Ok(projections::nearby_pending(
            &pending,
            &coords,
            radius_km,
            Utc::now(),
        )?)
    }

    /// Live variant of [`Self::list_pending_near`], refreshed on the scheduler's cadence.
    pub fn watch_pending_near(&self, coords: GeoPoint, radius_km: f64) -> Result<PendingWatch> {
        self.scheduler.start_pending_refresh(coords, radius_km)
    }

    pub async fn list_accepted(&self, acceptor_id: &str) -> Result<Vec<DonationRecord>> {
        let all = self.store.list_all().await?;
        Ok(projections::accepted_by(&all, acceptor_id))
    }

    pub async fn active_for_donor(&self, donor_id: &str) -> Result<Option<DonationRecord>> {
        let all = self.store.list_all().await?;
        Ok(projections::active_for_donor(&all, donor_id)?)
    }

    pub async fn tracking(&self, id: DonationId) -> Result<Option<TrackingView>> {
        let record = self.store.get(id).await?;
        Ok(projections::tracking_view(&record, self.speed_kmh)?)
    }
}
