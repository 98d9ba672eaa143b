//! Lifecycle error types.

use thiserror::Error;

use crate::types::{DonationId, DonationStatus, EventKind};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DonationError {
    #[error("Donation {0} not found")]
    NotFound(DonationId),

    /// A guard in the transition table failed; the record was left unchanged.
    #[error("Invalid transition: cannot apply {event} to a {from} donation")]
    InvalidTransition {
        from: DonationStatus,
        event: EventKind,
    },

    #[error("Invalid coordinate: ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("Invalid speed: {0} km/h")]
    InvalidSpeed(f64),

    #[error("Invalid distance: {0} km")]
    InvalidDistance(f64),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Donation {id} is not owned by {actor}")]
    NotOwner { id: DonationId, actor: String },

    /// The tracking loop writing this update was stopped before it committed.
    #[error("Tracking of donation {0} was stopped")]
    TrackingStopped(DonationId),
}

impl DonationError {
    /// Errors that tell a tracking loop to exit: its subject is gone, no
    /// longer en route, or the loop itself was stopped.
    pub fn ends_tracking(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidTransition { .. } | Self::TrackingStopped(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DonationError>;
