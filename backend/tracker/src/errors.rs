//! Application-wide error types.

use foodlink_lifecycle::DonationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Donation(#[from] DonationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    /// A write lost its revision guard to a concurrent update.
    #[error("Write conflict on donation {0}")]
    Conflict(i64),
}

impl TrackerError {
    /// The domain error behind this failure, if any.
    pub fn as_donation(&self) -> Option<&DonationError> {
        match self {
            Self::Donation(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
