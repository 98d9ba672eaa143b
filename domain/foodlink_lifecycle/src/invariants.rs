//! Record-level invariants.
//!
//! [`check_record`] is run by stores before committing an update; the
//! `assert_*` helpers panic with an `INV-n` tag and are meant for tests.

use crate::errors::{DonationError, Result};
use crate::types::{DonationRecord, DonationStatus};

/// INV-1: the acceptor location is attached iff the donation is `Accepted` or `EnRoute`.
/// INV-2: a `Pending` donation has no acceptor; `Accepted`, `EnRoute` and
/// `PickedUp` donations have one. `Cancelled` may go either way.
/// INV-3: `expires_at` is not before `created_at`.
pub fn check_record(record: &DonationRecord) -> Result<()> {
    if record.acceptor_location.is_some() != record.status.has_acceptor_location() {
        return Err(DonationError::IntegrityViolation(format!(
            "INV-1: donation {} is {} but acceptor location is {}",
            record.id,
            record.status,
            if record.acceptor_location.is_some() {
                "present"
            } else {
                "absent"
            }
        )));
    }

    let needs_acceptor = match record.status {
        DonationStatus::Pending => Some(false),
        DonationStatus::Accepted | DonationStatus::EnRoute | DonationStatus::PickedUp => {
            Some(true)
        }
        DonationStatus::Cancelled => None,
    };
    if let Some(expected) = needs_acceptor {
        if record.acceptor_id.is_some() != expected {
            return Err(DonationError::IntegrityViolation(format!(
                "INV-2: donation {} is {} but acceptor id is {:?}",
                record.id, record.status, record.acceptor_id
            )));
        }
    }

    if record.expires_at < record.created_at {
        return Err(DonationError::IntegrityViolation(format!(
            "INV-3: donation {} expires before it was created",
            record.id
        )));
    }
    Ok(())
}

/// Panicking form of [`check_record`].
pub fn assert_record_invariants(record: &DonationRecord) {
    if let Err(e) = check_record(record) {
        panic!("{e}");
    }
}

/// INV-4: only forward transitions (or the in-place self-transitions of the
/// table) are allowed:
///   Pending  -> Pending | Accepted | Cancelled
///   Accepted -> EnRoute | Cancelled
///   EnRoute  -> EnRoute | PickedUp | Cancelled
///   PickedUp, Cancelled -> (none)
pub fn assert_valid_status_transition(from: &DonationStatus, to: &DonationStatus) {
    use DonationStatus::*;
    let valid = matches!(
        (from, to),
        (Pending, Pending)
            | (Pending, Accepted)
            | (Pending, Cancelled)
            | (Accepted, EnRoute)
            | (Accepted, Cancelled)
            | (EnRoute, EnRoute)
            | (EnRoute, PickedUp)
            | (EnRoute, Cancelled)
    );

    assert!(
        valid,
        "INV-4 violated: invalid status transition from {:?} to {:?}",
        from, to
    );
}

/// INV-5: fields fixed at creation or acceptance never change afterwards.
pub fn assert_immutable_fields(original: &DonationRecord, current: &DonationRecord) {
    assert_eq!(original.id, current.id, "INV-5 violated: donation id changed");
    assert_eq!(
        original.donor_id, current.donor_id,
        "INV-5 violated: donor id changed"
    );
    assert_eq!(
        original.donor_location, current.donor_location,
        "INV-5 violated: donor location changed"
    );
    assert_eq!(
        original.created_at, current.created_at,
        "INV-5 violated: created_at changed"
    );
    if original.acceptor_id.is_some() {
        assert_eq!(
            original.acceptor_id, current.acceptor_id,
            "INV-5 violated: acceptor id changed after acceptance"
        );
        assert_eq!(
            original.acceptor_name, current.acceptor_name,
            "INV-5 violated: acceptor name changed after acceptance"
        );
    }
}

/// INV-6: revisions never decrease.
pub fn assert_revision_monotonic(before: u64, after: u64) {
    assert!(
        after >= before,
        "INV-6 violated: revision decreased from {} to {}",
        before,
        after
    );
}
