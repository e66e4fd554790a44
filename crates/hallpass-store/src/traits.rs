//! Store trait definitions

use chrono::{DateTime, Local};
use hallpass_api::{AuditAction, AuditRecord, Destination, Gender, StudentRecord};
use hallpass_util::{DestinationId, ReservationId, StudentId};

use crate::StoreResult;

/// A live reservation row. Student and destination fields are frozen at
/// admission time; the closing audit record is written from this copy, so
/// both records of a checkout always carry the identical snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveReservation {
    pub id: ReservationId,
    pub student_id: StudentId,
    pub student_name: String,
    pub student_email: String,
    pub gender: Gender,
    /// `None` = unassigned; unassigned students never occupy a slot
    pub class: Option<String>,
    pub destination_id: DestinationId,
    pub destination_name: String,
    pub checked_out_at: DateTime<Local>,
    pub deadline: DateTime<Local>,
    pub note: Option<String>,
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    /// Reservation and its open OUT record were written
    Admitted,
    /// The student already has an open reservation
    StudentAlreadyOut,
    /// The (class, gender) slot is occupied
    SlotTaken { gender: Gender },
}

/// Main store trait
pub trait Store: Send + Sync {
    // Roster

    /// Insert or update a student, keyed by normalized email
    fn upsert_student(&self, student: &StudentRecord) -> StoreResult<()>;

    /// Remove a student by normalized email; returns whether a row existed
    fn remove_student(&self, email: &str) -> StoreResult<bool>;

    /// Look up a student by normalized email
    fn get_student_by_email(&self, email: &str) -> StoreResult<Option<StudentRecord>>;

    /// List the roster, ordered by name
    fn list_students(&self) -> StoreResult<Vec<StudentRecord>>;

    /// Re-canonicalize every student's gender from its retained raw text.
    /// Returns the number of rows whose canonical value changed. Audit
    /// snapshots are history and are never touched.
    fn normalize_stored_genders(&self) -> StoreResult<usize>;

    // Destination catalog

    /// Insert or update a destination
    fn upsert_destination(&self, dest: &Destination) -> StoreResult<()>;

    /// Look up a destination by ID
    fn get_destination(&self, id: &DestinationId) -> StoreResult<Option<Destination>>;

    /// List the catalog, ordered by sort hint then name
    fn list_destinations(&self) -> StoreResult<Vec<Destination>>;

    // Reservations

    /// Atomically admit a reservation: re-check the student and the
    /// (class, gender) slot, then insert the reservation and its open OUT
    /// audit record in one transaction. Unique-constraint violations map
    /// to the corresponding conflict outcome, never to an error.
    fn admit(&self, reservation: &ActiveReservation) -> StoreResult<AdmitOutcome>;

    /// All open reservations, oldest first
    fn active_reservations(&self) -> StoreResult<Vec<ActiveReservation>>;

    /// The student's open reservation, if any
    fn active_for_student(&self, student_id: &StudentId) -> StoreResult<Option<ActiveReservation>>;

    /// Open reservations for students of one class
    fn active_in_class(&self, class: &str) -> StoreResult<Vec<ActiveReservation>>;

    /// Open reservations whose deadline has passed
    fn expired_reservations(&self, now: DateTime<Local>) -> StoreResult<Vec<ActiveReservation>>;

    /// Delete-to-claim termination. Exactly one concurrent caller deletes
    /// the reservation row; that caller writes the closing audit record
    /// (copying the reservation's snapshot and checkout timestamp) and
    /// removes the open OUT record, all in one transaction. Everyone else
    /// gets `None`, which is success, not an error.
    fn finalize_reservation(
        &self,
        id: &ReservationId,
        action: AuditAction,
        now: DateTime<Local>,
    ) -> StoreResult<Option<AuditRecord>>;

    // Audit trail

    /// Recent audit records, newest first
    fn recent_audit_records(&self, limit: usize) -> StoreResult<Vec<AuditRecord>>;

    /// Open OUT records. At steady state these mirror the active
    /// reservation set and serve as a fallback read path.
    fn open_audit_records(&self) -> StoreResult<Vec<AuditRecord>>;

    /// Delete one audit record; returns rows removed
    fn delete_audit_record(&self, id: i64) -> StoreResult<usize>;

    /// Delete a set of audit records; returns rows removed
    fn delete_audit_records(&self, ids: &[i64]) -> StoreResult<usize>;

    /// Delete audit records snapshotted with the given class label.
    /// An empty label targets records of unassigned students.
    fn delete_audit_by_class(&self, class: &str) -> StoreResult<usize>;

    /// Delete the entire audit trail; returns rows removed
    fn delete_all_audit(&self) -> StoreResult<usize>;

    // Settings

    /// Read a settings value
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Upsert a settings value
    fn put_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    // Health

    /// Check if the store is usable
    fn is_healthy(&self) -> bool;
}
