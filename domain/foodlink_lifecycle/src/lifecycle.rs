//! # Lifecycle Engine
//!
//! Validates a [`DonationEvent`] against the current record and applies its
//! effect. This is the only place donation status changes.
//!
//! | From                         | Event            | To          | Effect                               |
//! |------------------------------|------------------|-------------|--------------------------------------|
//! | `Pending`                    | `Accept`         | `Accepted`  | set acceptor id, name and location   |
//! | `Accepted`                   | `StartPickup`    | `EnRoute`   | status only                          |
//! | `EnRoute`                    | `UpdateLocation` | `EnRoute`   | replace acceptor location            |
//! | `EnRoute`                    | `Complete`       | `PickedUp`  | clear acceptor location              |
//! | `Pending\|Accepted\|EnRoute` | `Cancel`         | `Cancelled` | clear acceptor location              |
//! | `Pending`                    | `EditDetails`    | `Pending`   | replace payload fields (owner only)  |
//!
//! Any other combination yields [`DonationError::InvalidTransition`]. Guards
//! are evaluated before any field is written, so a rejected event leaves the
//! record exactly as it was.

use chrono::Duration;

use crate::errors::{DonationError, Result};
use crate::types::{DonationEvent, DonationRecord, DonationStatus};

/// Status an event leads to from `from`, or `None` when the table has no row.
pub fn next_status(from: DonationStatus, event: &DonationEvent) -> Option<DonationStatus> {
    use DonationStatus::*;
    match (from, event) {
        (Pending, DonationEvent::Accept { .. }) => Some(Accepted),
        (Accepted, DonationEvent::StartPickup) => Some(EnRoute),
        (EnRoute, DonationEvent::UpdateLocation(_)) => Some(EnRoute),
        (EnRoute, DonationEvent::Complete) => Some(PickedUp),
        (Pending | Accepted | EnRoute, DonationEvent::Cancel) => Some(Cancelled),
        (Pending, DonationEvent::EditDetails { .. }) => Some(Pending),
        _ => None,
    }
}

/// Apply `event` to `record` in place.
///
/// Payload validation (coordinates, ownership, patch values) happens after
/// the status guard and before any mutation.
pub fn apply(record: &mut DonationRecord, event: DonationEvent) -> Result<()> {
    let to = next_status(record.status, &event).ok_or(DonationError::InvalidTransition {
        from: record.status,
        event: event.kind(),
    })?;

    match event {
        DonationEvent::Accept {
            acceptor_id,
            acceptor_name,
            location,
        } => {
            location.validate()?;
            if acceptor_id.trim().is_empty() {
                return Err(DonationError::Validation("acceptor id is required".into()));
            }
            record.acceptor_id = Some(acceptor_id);
            record.acceptor_name = Some(acceptor_name);
            record.acceptor_location = Some(location);
        }
        DonationEvent::StartPickup => {}
        DonationEvent::UpdateLocation(location) => {
            location.validate()?;
            record.acceptor_location = Some(location);
        }
        DonationEvent::Complete | DonationEvent::Cancel => {
            record.acceptor_location = None;
        }
        DonationEvent::EditDetails { donor_id, patch } => {
            if donor_id != record.donor_id {
                return Err(DonationError::NotOwner {
                    id: record.id,
                    actor: donor_id,
                });
            }
            let food_type = match patch.food_type {
                Some(f) if f.trim().is_empty() => {
                    return Err(DonationError::Validation("food type is required".into()))
                }
                Some(f) => Some(f.trim().to_string()),
                None => None,
            };
            if patch.quantity == Some(0) {
                return Err(DonationError::Validation(
                    "quantity must be greater than zero".into(),
                ));
            }
            if patch.expires_in_hours == Some(0) {
                return Err(DonationError::Validation(
                    "expiry hours must be greater than zero".into(),
                ));
            }

            if let Some(food_type) = food_type {
                record.food_type = food_type;
            }
            if let Some(quantity) = patch.quantity {
                record.quantity = quantity;
            }
            if let Some(unit) = patch.unit.filter(|u| !u.trim().is_empty()) {
                record.unit = unit.trim().to_string();
            }
            if let Some(hours) = patch.expires_in_hours {
                record.expires_at = record.created_at + Duration::hours(i64::from(hours));
            }
        }
    }

    record.status = to;
    Ok(())
}
