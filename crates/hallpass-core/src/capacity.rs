//! Per-class slot availability
//!
//! One student of each gender may be away from a class at a time. A
//! gender's slot is occupied iff at least one live reservation in that
//! class carries it. Reservations always carry a canonical gender, so
//! availability is a pure fold over the live set.

use hallpass_api::Availability;
use hallpass_store::ActiveReservation;

/// Compute slot availability from the live reservations of one class.
///
/// Never cached: admission calls this inline against the latest committed
/// state, and the constraint inside the admission transaction backstops
/// anything that changes between this read and the insert.
pub fn availability_among(reservations: &[ActiveReservation]) -> Availability {
    let mut availability = Availability::open();
    for r in reservations {
        match r.gender {
            hallpass_api::Gender::Male => availability.male_available = false,
            hallpass_api::Gender::Female => availability.female_available = false,
        }
    }
    availability
}
