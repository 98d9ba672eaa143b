//! Read projections over a snapshot of donation records.
//!
//! Every function here is pure: callers fetch records from the store on each
//! poll tick and recompute the view they need.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{DonationError, Result};
use crate::geo::{distance_km, eta_minutes};
use crate::types::{DonationRecord, DonationStatus, GeoPoint};

/// A pending donation as seen from an acceptor's position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyDonation {
    #[serde(flatten)]
    pub donation: DonationRecord,
    pub distance_km: f64,
    /// Past its `expires_at`. Informational only; nothing is auto-cancelled.
    pub expired: bool,
}

/// Distance and ETA between an acceptor and the donor's pickup point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingView {
    pub donation_id: i64,
    pub status: DonationStatus,
    pub acceptor_location: GeoPoint,
    pub donor_location: GeoPoint,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub arrived: bool,
    pub revision: u64,
}

/// Pending donations within `radius_km` of `observer`, nearest first.
///
/// Ties on distance go to the earlier `created_at`, then the lower id.
pub fn nearby_pending(
    records: &[DonationRecord],
    observer: &GeoPoint,
    radius_km: f64,
    now: DateTime<Utc>,
) -> Result<Vec<NearbyDonation>> {
    observer.validate()?;
    if !radius_km.is_finite() || radius_km < 0.0 {
        return Err(DonationError::InvalidDistance(radius_km));
    }

    let mut nearby = Vec::new();
    for record in records
        .iter()
        .filter(|r| r.status == DonationStatus::Pending)
    {
        let distance = distance_km(observer, &record.donor_location)?;
        if distance <= radius_km {
            nearby.push(NearbyDonation {
                expired: record.is_expired(now),
                donation: record.clone(),
                distance_km: distance,
            });
        }
    }

    nearby.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.donation.created_at.cmp(&b.donation.created_at))
            .then_with(|| a.donation.id.cmp(&b.donation.id))
    });
    Ok(nearby)
}

/// The donor's donation that is currently accepted or en route, if any.
///
/// More than one such donation means the data is inconsistent; that is
/// reported rather than picking one.
pub fn active_for_donor(
    records: &[DonationRecord],
    donor_id: &str,
) -> Result<Option<DonationRecord>> {
    let mut active = records
        .iter()
        .filter(|r| r.donor_id == donor_id && r.status.has_acceptor_location());

    let first = active.next();
    if let Some(second) = active.next() {
        let mut ids = vec![first.map(|r| r.id).unwrap_or_default(), second.id];
        ids.extend(active.map(|r| r.id));
        return Err(DonationError::IntegrityViolation(format!(
            "donor {donor_id} has {} active donations: {ids:?}",
            ids.len()
        )));
    }
    Ok(first.cloned())
}

/// All donations created by `donor_id`, newest first.
pub fn mine(records: &[DonationRecord], donor_id: &str) -> Vec<DonationRecord> {
    let mut out: Vec<DonationRecord> = records
        .iter()
        .filter(|r| r.donor_id == donor_id)
        .cloned()
        .collect();
    sort_newest_first(&mut out);
    out
}

/// All donations claimed by `acceptor_id`, newest first.
pub fn accepted_by(records: &[DonationRecord], acceptor_id: &str) -> Vec<DonationRecord> {
    let mut out: Vec<DonationRecord> = records
        .iter()
        .filter(|r| r.acceptor_id.as_deref() == Some(acceptor_id))
        .cloned()
        .collect();
    sort_newest_first(&mut out);
    out
}

/// Distance/ETA snapshot for a tracked donation.
///
/// Returns `None` when no acceptor location is attached (pending or finished).
pub fn tracking_view(record: &DonationRecord, speed_kmh: f64) -> Result<Option<TrackingView>> {
    let Some(acceptor_location) = record.acceptor_location else {
        return Ok(None);
    };
    let distance = distance_km(&acceptor_location, &record.donor_location)?;
    let eta = eta_minutes(distance, speed_kmh)?;
    Ok(Some(TrackingView {
        donation_id: record.id,
        status: record.status,
        acceptor_location,
        donor_location: record.donor_location,
        distance_km: distance,
        eta_minutes: eta,
        arrived: eta == 0,
        revision: record.revision,
    }))
}

fn sort_newest_first(records: &mut [DonationRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
