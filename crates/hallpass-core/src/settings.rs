//! The auto-return window setting
//!
//! A single tunable stored as a key-value row. The range invariant is
//! enforced at the write boundary only; reads fall back to the default
//! for anything unset or unparsable.

use crate::CheckoutError;

/// Settings-table key for the auto-return window
pub const AUTO_RETURN_KEY: &str = "auto_return_minutes";

pub const MIN_WINDOW_MINUTES: u32 = 5;
pub const MAX_WINDOW_MINUTES: u32 = 15;
pub const DEFAULT_WINDOW_MINUTES: u32 = 10;

/// Interpret a stored setting value. Unset, unparsable, or out-of-range
/// values (which no valid write produces) all read as the default.
pub(crate) fn window_from_stored(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|m| (MIN_WINDOW_MINUTES..=MAX_WINDOW_MINUTES).contains(m))
        .unwrap_or(DEFAULT_WINDOW_MINUTES)
}

/// Validate a requested window before it is written.
pub(crate) fn validate_window(minutes: i64) -> Result<u32, CheckoutError> {
    if minutes < MIN_WINDOW_MINUTES as i64 || minutes > MAX_WINDOW_MINUTES as i64 {
        return Err(CheckoutError::OutOfRange { minutes });
    }
    Ok(minutes as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_values_read_leniently() {
        assert_eq!(window_from_stored(None), 10);
        assert_eq!(window_from_stored(Some("7")), 7);
        assert_eq!(window_from_stored(Some(" 12 ")), 12);
        assert_eq!(window_from_stored(Some("banana")), 10);
        assert_eq!(window_from_stored(Some("")), 10);
        // A row older than the range invariant reads as the default
        assert_eq!(window_from_stored(Some("45")), 10);
        assert_eq!(window_from_stored(Some("-3")), 10);
    }

    #[test]
    fn writes_reject_out_of_range() {
        assert!(matches!(
            validate_window(3),
            Err(CheckoutError::OutOfRange { minutes: 3 })
        ));
        assert!(matches!(
            validate_window(20),
            Err(CheckoutError::OutOfRange { minutes: 20 })
        ));
        assert!(matches!(
            validate_window(-1),
            Err(CheckoutError::OutOfRange { minutes: -1 })
        ));
        assert_eq!(validate_window(5).unwrap(), 5);
        assert_eq!(validate_window(15).unwrap(), 15);
        assert_eq!(validate_window(10).unwrap(), 10);
    }
}
