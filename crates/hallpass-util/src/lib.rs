//! Shared utilities for hallpassd
//!
//! This crate provides:
//! - ID types (StudentId, ReservationId, DestinationId, ClientId)
//! - Time helpers (deadlines, whole-minute durations)
//! - Email normalization
//! - Rate limiting helpers
//! - Default paths for socket, data, and log directories

mod email;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use email::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
