//! Persistence layer for hallpassd
//!
//! Provides:
//! - Roster storage (students with canonicalized genders)
//! - Destination catalog
//! - Active reservations with atomic admission
//! - Append-only audit trail with delete-to-claim finalization
//! - Settings key-value store

mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
