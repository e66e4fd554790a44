//! Configuration validation

use crate::schema::{RawConfig, RawDestination};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Destination '{destination_id}': {message}")]
    DestinationError {
        destination_id: String,
        message: String,
    },

    #[error("Duplicate destination ID: {0}")]
    DuplicateDestinationId(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.service.sweep_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "sweep_interval_seconds must be at least 1".into(),
        ));
    }

    let mut seen_ids = HashSet::new();
    for dest in &config.destinations {
        if !seen_ids.insert(&dest.id) {
            errors.push(ValidationError::DuplicateDestinationId(dest.id.clone()));
        }
    }

    for dest in &config.destinations {
        errors.extend(validate_destination(dest));
    }

    errors
}

fn validate_destination(dest: &RawDestination) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if dest.id.trim().is_empty() {
        errors.push(ValidationError::DestinationError {
            destination_id: dest.id.clone(),
            message: "id cannot be empty".into(),
        });
    } else if dest.id.chars().any(|c| c.is_whitespace()) {
        errors.push(ValidationError::DestinationError {
            destination_id: dest.id.clone(),
            message: "id cannot contain whitespace".into(),
        });
    }

    if dest.name.trim().is_empty() {
        errors.push(ValidationError::DestinationError {
            destination_id: dest.id.clone(),
            message: "name cannot be empty".into(),
        });
    }

    errors
}
