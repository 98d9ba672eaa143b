//! # FoodLink Lifecycle
//!
//! Pure domain crate for the FoodLink donation tracker: the donation state
//! machine, the geo math behind live tracking, and the read projections the
//! dashboards poll.
//!
//! | Concern      | Module             | Entry point(s)                                   |
//! |--------------|--------------------|--------------------------------------------------|
//! | Data model   | [`types`]          | [`DonationRecord`], [`DonationStatus`], [`DonationEvent`] |
//! | Geo math     | [`geo`]            | [`geo::distance_km`], [`geo::eta_minutes`]       |
//! | Transitions  | [`lifecycle`]      | [`lifecycle::apply`]                             |
//! | Read models  | [`projections`]    | `nearby_pending`, `active_for_donor`, `mine`, `accepted_by` |
//! | Consistency  | [`invariants`]     | [`invariants::check_record`]                     |
//!
//! ## Architecture
//!
//! Nothing here performs I/O or holds shared state. Stores own the records and
//! call [`lifecycle::apply`] inside their atomic update; the tracker backend
//! wires stores, schedulers and the REST surface around this crate.

pub mod errors;
pub mod geo;
pub mod invariants;
pub mod lifecycle;
pub mod projections;
pub mod types;

pub use errors::{DonationError, Result};
pub use types::{
    DonationEvent, DonationId, DonationPatch, DonationRecord, DonationStatus, EventKind, GeoPoint,
    NewDonation,
};
