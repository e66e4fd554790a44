//! Typed failures for checkout operations

use hallpass_api::Gender;
use hallpass_store::StoreError;
use thiserror::Error;

use crate::{MAX_WINDOW_MINUTES, MIN_WINDOW_MINUTES};

/// Everything a checkout operation can fail with.
///
/// Display strings are user-facing: short and actionable. Store failures
/// deliberately hide the underlying cause; the full error is logged
/// server-side before the message reaches a client.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("No student is on file for that email address")]
    NotFound,

    #[error("{name} is already checked out")]
    AlreadyOut { name: String },

    #[error("{name} has no gender on file, so a slot cannot be assigned")]
    NoGenderOnFile { name: String },

    #[error("A {} student from this class is already out", occupied.as_str().to_lowercase())]
    CapacityExceeded { occupied: Gender },

    #[error("Destination '{destination}' is not available")]
    InvalidDestination { destination: String },

    #[error("{name} is not checked out")]
    NotCheckedOut { name: String },

    #[error(
        "Auto-return window must be between {MIN_WINDOW_MINUTES} and {MAX_WINDOW_MINUTES} minutes, got {minutes}"
    )]
    OutOfRange { minutes: i64 },

    #[error("The system is temporarily unavailable, please try again")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_occupying_gender() {
        let err = CheckoutError::CapacityExceeded {
            occupied: Gender::Female,
        };
        assert_eq!(
            err.to_string(),
            "A female student from this class is already out"
        );
    }

    #[test]
    fn store_message_hides_detail() {
        let err = CheckoutError::Store(StoreError::Database("disk I/O error".into()));
        assert!(!err.to_string().contains("disk"));
    }
}
