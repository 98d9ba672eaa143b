//! # Types
//!
//! Shared data structures used across all modules of the FoodLink lifecycle.
//!
//! ## Design decisions
//!
//! ### Payload / tracking split
//!
//! A [`DonationRecord`] carries two kinds of fields:
//!
//! - the donor payload (`food_type`, `quantity`, `unit`, `expires_at`,
//!   `donor_location`) — written at creation, editable only by the owning
//!   donor while the donation is still `Pending`;
//! - the acceptor/tracking fields (`acceptor_*`, `status`) — written only by
//!   lifecycle events.
//!
//! ### Status as a Finite-State Machine
//!
//! [`DonationStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Pending ──► Accepted ──► EnRoute ──► PickedUp
//!    │           │            │
//!    └───────────┴────────────┴──► Cancelled
//! ```
//!
//! Backward transitions and transitions out of terminal states (`PickedUp`,
//! `Cancelled`) are rejected by [`crate::lifecycle::apply`].

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{DonationError, Result};

/// Store-assigned donation identifier.
pub type DonationId = i64;

/// Unit used when a donor does not name one.
pub const DEFAULT_UNIT: &str = "servings";

/// A WGS-84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Reject non-finite or out-of-range coordinates.
    pub fn validate(&self) -> Result<()> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(DonationError::InvalidCoordinate {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }
}

/// Lifecycle status of a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    /// Created by a donor; waiting for an acceptor.
    Pending,
    /// Claimed by an acceptor; pickup not started.
    Accepted,
    /// Acceptor is on the way; location is tracked.
    EnRoute,
    /// Food collected. Terminal.
    PickedUp,
    /// Withdrawn before pickup. Terminal.
    Cancelled,
}

impl DonationStatus {
    pub const ALL: [DonationStatus; 5] = [
        Self::Pending,
        Self::Accepted,
        Self::EnRoute,
        Self::PickedUp,
        Self::Cancelled,
    ];

    /// Short identifier suitable for storage in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::EnRoute => "en_route",
            Self::PickedUp => "picked_up",
            Self::Cancelled => "cancelled",
        }
    }

    /// Inverse of [`DonationStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PickedUp | Self::Cancelled)
    }

    /// States during which the acceptor's location is attached to the record.
    pub fn has_acceptor_location(&self) -> bool {
        matches!(self, Self::Accepted | Self::EnRoute)
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Donor-supplied payload for a new donation, validated before it reaches a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDonation {
    pub donor_id: String,
    pub donor_name: Option<String>,
    pub food_type: String,
    pub quantity: u32,
    pub unit: String,
    pub location_text: String,
    pub donor_location: GeoPoint,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewDonation {
    /// Build a payload whose expiry is `expires_in_hours` after `created_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        donor_id: impl Into<String>,
        donor_name: Option<String>,
        food_type: impl Into<String>,
        quantity: u32,
        unit: Option<String>,
        expires_in_hours: u32,
        location_text: impl Into<String>,
        donor_location: GeoPoint,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let donation = Self {
            donor_id: donor_id.into(),
            donor_name,
            food_type: food_type.into().trim().to_string(),
            quantity,
            unit: unit
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            location_text: location_text.into(),
            donor_location,
            created_at,
            expires_at: created_at + Duration::hours(i64::from(expires_in_hours)),
        };
        donation.validate(expires_in_hours)?;
        Ok(donation)
    }

    fn validate(&self, expires_in_hours: u32) -> Result<()> {
        if self.donor_id.trim().is_empty() {
            return Err(DonationError::Validation("donor id is required".into()));
        }
        if self.food_type.is_empty() {
            return Err(DonationError::Validation("food type is required".into()));
        }
        if self.quantity == 0 {
            return Err(DonationError::Validation(
                "quantity must be greater than zero".into(),
            ));
        }
        if expires_in_hours == 0 {
            return Err(DonationError::Validation(
                "expiry hours must be greater than zero".into(),
            ));
        }
        self.donor_location.validate()
    }
}

/// Full representation of one donation from creation to pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: DonationId,
    pub donor_id: String,
    pub donor_name: Option<String>,
    pub donor_location: GeoPoint,
    pub location_text: String,
    pub food_type: String,
    pub quantity: u32,
    pub unit: String,
    pub expires_at: DateTime<Utc>,
    pub status: DonationStatus,
    pub acceptor_id: Option<String>,
    pub acceptor_name: Option<String>,
    pub acceptor_location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by the store on every successful update.
    pub revision: u64,
}

impl DonationRecord {
    /// Materialise a freshly created record (status `Pending`, revision 0).
    pub fn from_new(id: DonationId, new: NewDonation) -> Self {
        Self {
            id,
            donor_id: new.donor_id,
            donor_name: new.donor_name,
            donor_location: new.donor_location,
            location_text: new.location_text,
            food_type: new.food_type,
            quantity: new.quantity,
            unit: new.unit,
            expires_at: new.expires_at,
            status: DonationStatus::Pending,
            acceptor_id: None,
            acceptor_name: None,
            acceptor_location: None,
            created_at: new.created_at,
            updated_at: new.created_at,
            revision: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Donor-side changes to a pending donation. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DonationPatch {
    pub food_type: Option<String>,
    pub quantity: Option<u32>,
    pub unit: Option<String>,
    pub expires_in_hours: Option<u32>,
}

/// Commands that drive a donation through its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DonationEvent {
    Accept {
        acceptor_id: String,
        acceptor_name: String,
        location: GeoPoint,
    },
    StartPickup,
    UpdateLocation(GeoPoint),
    Complete,
    Cancel,
    EditDetails {
        donor_id: String,
        patch: DonationPatch,
    },
}

impl DonationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Accept { .. } => EventKind::Accept,
            Self::StartPickup => EventKind::StartPickup,
            Self::UpdateLocation(_) => EventKind::UpdateLocation,
            Self::Complete => EventKind::Complete,
            Self::Cancel => EventKind::Cancel,
            Self::EditDetails { .. } => EventKind::EditDetails,
        }
    }
}

/// Payload-free name of a [`DonationEvent`], carried by transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Accept,
    StartPickup,
    UpdateLocation,
    Complete,
    Cancel,
    EditDetails,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::StartPickup => "start_pickup",
            Self::UpdateLocation => "update_location",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::EditDetails => "edit_details",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delhi() -> GeoPoint {
        GeoPoint::new(28.6139, 77.2090)
    }

    #[test]
    fn status_str_round_trips() {
        for status in DonationStatus::ALL {
            assert_eq!(DonationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DonationStatus::parse("onTheWay"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DonationStatus::EnRoute).unwrap();
        assert_eq!(json, "\"en_route\"");
    }

    #[test]
    fn new_donation_derives_expiry_from_hours() {
        let now = Utc::now();
        let d = NewDonation::new("donor-1", None, "Rice", 15, None, 3, "CP", delhi(), now)
            .unwrap();
        assert_eq!(d.expires_at, now + Duration::hours(3));
        assert_eq!(d.unit, DEFAULT_UNIT);
    }

    #[test]
    fn new_donation_rejects_empty_payload() {
        let now = Utc::now();
        let err = NewDonation::new("donor-1", None, "  ", 15, None, 3, "CP", delhi(), now)
            .unwrap_err();
        assert!(matches!(err, DonationError::Validation(_)));

        let err = NewDonation::new("donor-1", None, "Rice", 0, None, 3, "CP", delhi(), now)
            .unwrap_err();
        assert!(matches!(err, DonationError::Validation(_)));

        let err = NewDonation::new("donor-1", None, "Rice", 1, None, 0, "CP", delhi(), now)
            .unwrap_err();
        assert!(matches!(err, DonationError::Validation(_)));
    }

    #[test]
    fn new_donation_rejects_bad_coordinates() {
        let err = NewDonation::new(
            "donor-1",
            None,
            "Rice",
            15,
            None,
            3,
            "nowhere",
            GeoPoint::new(91.0, 0.0),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DonationError::InvalidCoordinate { .. }));
    }

    #[test]
    fn from_new_starts_pending_without_acceptor() {
        let d = NewDonation::new("donor-1", None, "Rice", 15, None, 3, "CP", delhi(), Utc::now())
            .unwrap();
        let record = DonationRecord::from_new(7, d);
        assert_eq!(record.id, 7);
        assert_eq!(record.status, DonationStatus::Pending);
        assert_eq!(record.revision, 0);
        assert!(record.acceptor_id.is_none());
        assert!(record.acceptor_location.is_none());
    }
}
