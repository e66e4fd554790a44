//! Checkout reservation engine for hallpassd
//!
//! This crate is the heart of hallpassd, containing:
//! - Admission control (one student per gender per class away at a time)
//! - The shared finalize path (manual check-in, auto-return, bulk reset)
//! - The auto-return sweeper
//! - The auto-return window setting and its range invariant

mod capacity;
mod engine;
mod error;
mod settings;

pub use capacity::*;
pub use engine::*;
pub use error::*;
pub use settings::*;
