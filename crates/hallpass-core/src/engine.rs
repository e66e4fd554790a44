//! Checkout engine: admission, termination, and the auto-return sweep

use chrono::{DateTime, Local};
use hallpass_api::{
    API_VERSION, AuditAction, AuditRecord, Availability, BoardSnapshot, Destination, Gender,
    HealthStatus, ReservationView, StudentRecord,
};
use hallpass_store::{ActiveReservation, AdmitOutcome, Store};
use hallpass_util::{
    DestinationId, ReservationId, StudentId, deadline_after, format_clock_time, normalize_email,
    whole_minutes_between,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{CheckoutError, availability_among, settings};

/// Successful admission, as reported back to the caller
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub reservation_id: ReservationId,
    pub student_name: String,
    pub destination_name: String,
    pub deadline: DateTime<Local>,
    pub message: String,
}

/// Successful manual check-in
#[derive(Debug, Clone)]
pub struct CheckinReceipt {
    pub student_name: String,
    pub duration_minutes: i64,
    pub message: String,
    /// The closing record this caller wrote; `None` when the sweep or a
    /// reset claimed the reservation first
    pub record: Option<AuditRecord>,
}

/// The checkout reservation engine.
///
/// Stateless apart from the store handle: every invariant lives in the
/// durable state, so independent callers (kiosks, the dashboard, the
/// sweep interval) can drive the same operations concurrently. Operations
/// that depend on the clock take `now` explicitly; the daemon passes the
/// current time, tests pass fabricated instants.
pub struct CheckoutEngine {
    store: Arc<dyn Store>,
}

impl CheckoutEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Admit a checkout.
    ///
    /// A stale reservation past its deadline must never block a new
    /// admission, so a sweep pass runs after the duplicate check and
    /// before capacity is read. The store re-validates both the duplicate
    /// and the slot inside the admission transaction; conflicts detected
    /// there surface through the same two error paths.
    pub fn check_out(
        &self,
        email: &str,
        destination_id: &DestinationId,
        note: Option<String>,
        now: DateTime<Local>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let email = normalize_email(email);
        let student = self
            .store
            .get_student_by_email(&email)?
            .ok_or(CheckoutError::NotFound)?;

        if self.store.active_for_student(&student.id)?.is_some() {
            return Err(CheckoutError::AlreadyOut { name: student.name });
        }

        self.sweep(now)?;

        let Some(gender) = student.gender else {
            return Err(CheckoutError::NoGenderOnFile { name: student.name });
        };

        if let Some(class) = &student.class {
            let slots = availability_among(&self.store.active_in_class(class)?);
            if !slots.is_available(gender) {
                return Err(CheckoutError::CapacityExceeded { occupied: gender });
            }
        }

        let destination = self
            .store
            .get_destination(destination_id)?
            .filter(|d| d.active)
            .ok_or_else(|| CheckoutError::InvalidDestination {
                destination: destination_id.to_string(),
            })?;

        let minutes = self.auto_return_minutes()?;
        let reservation = ActiveReservation {
            id: ReservationId::new(),
            student_id: student.id,
            student_name: student.name,
            student_email: student.email,
            gender,
            class: student.class,
            destination_id: destination.id,
            destination_name: destination.name,
            checked_out_at: now,
            deadline: deadline_after(now, minutes),
            note: note.filter(|n| !n.trim().is_empty()),
        };

        match self.store.admit(&reservation)? {
            AdmitOutcome::Admitted => {}
            AdmitOutcome::StudentAlreadyOut => {
                return Err(CheckoutError::AlreadyOut {
                    name: reservation.student_name,
                });
            }
            AdmitOutcome::SlotTaken { gender } => {
                return Err(CheckoutError::CapacityExceeded { occupied: gender });
            }
        }

        info!(
            student = %reservation.student_email,
            destination = %reservation.destination_id,
            deadline = %reservation.deadline,
            "Checked out"
        );

        let message = format!(
            "{} checked out to {}, due back by {}",
            reservation.student_name,
            reservation.destination_name,
            format_clock_time(&reservation.deadline),
        );
        Ok(CheckoutReceipt {
            reservation_id: reservation.id,
            student_name: reservation.student_name,
            destination_name: reservation.destination_name,
            deadline: reservation.deadline,
            message,
        })
    }

    /// Manually close a student's checkout.
    ///
    /// Losing the finalize race to the sweeper or a reset is still a
    /// successful check-in: the checkout is closed either way, and the
    /// winner already wrote the one closing record.
    pub fn check_in(
        &self,
        email: &str,
        now: DateTime<Local>,
    ) -> Result<CheckinReceipt, CheckoutError> {
        let email = normalize_email(email);
        let student = self
            .store
            .get_student_by_email(&email)?
            .ok_or(CheckoutError::NotFound)?;

        let Some(reservation) = self.store.active_for_student(&student.id)? else {
            return Err(CheckoutError::NotCheckedOut { name: student.name });
        };

        let record = self
            .store
            .finalize_reservation(&reservation.id, AuditAction::In, now)?;
        let duration = match &record {
            Some(record) => record.duration_minutes.unwrap_or(0),
            None => whole_minutes_between(reservation.checked_out_at, now),
        };

        info!(student = %email, duration_minutes = duration, "Checked in");

        Ok(CheckinReceipt {
            message: format!(
                "Welcome back, {}. Out for {} minutes.",
                student.name, duration
            ),
            student_name: student.name,
            duration_minutes: duration,
            record,
        })
    }

    /// Close every live checkout with action `RESET`.
    ///
    /// An administrative sledgehammer. Failures are isolated per
    /// reservation; the count reflects only the rows this caller closed.
    pub fn reset_all(&self, now: DateTime<Local>) -> Result<usize, CheckoutError> {
        let open = self.store.active_reservations()?;
        let mut closed = 0;
        for reservation in open {
            match self
                .store
                .finalize_reservation(&reservation.id, AuditAction::Reset, now)
            {
                Ok(Some(_)) => closed += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Reset skipped a reservation");
                }
            }
        }

        info!(closed, "Reset all checkouts");
        Ok(closed)
    }

    /// Close every checkout past its auto-return deadline.
    ///
    /// Safe to run from any number of contexts at once (the daemon
    /// interval, admission, an external scheduler): finalize's
    /// delete-to-claim makes each closure happen exactly once, and a
    /// reservation another caller already closed is skipped quietly.
    /// One failing reservation never aborts the rest of the pass.
    pub fn sweep(&self, now: DateTime<Local>) -> Result<usize, CheckoutError> {
        let expired = self.store.expired_reservations(now)?;
        let mut closed = 0;
        for reservation in expired {
            match self
                .store
                .finalize_reservation(&reservation.id, AuditAction::Auto, now)
            {
                Ok(Some(record)) => {
                    closed += 1;
                    info!(
                        student = %record.student_email,
                        duration_minutes = record.duration_minutes.unwrap_or(0),
                        "Auto-returned overdue checkout"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Sweep skipped a reservation");
                }
            }
        }

        if closed > 0 {
            debug!(closed, "Sweep pass complete");
        }
        Ok(closed)
    }

    /// Slot availability for one class. An empty label means unassigned
    /// students, which no class-scoped slot constrains.
    pub fn availability(&self, class: &str) -> Result<Availability, CheckoutError> {
        let class = class.trim();
        if class.is_empty() {
            return Ok(Availability::open());
        }
        Ok(availability_among(&self.store.active_in_class(class)?))
    }

    /// The configured auto-return window in minutes.
    pub fn auto_return_minutes(&self) -> Result<u32, CheckoutError> {
        let stored = self.store.get_setting(settings::AUTO_RETURN_KEY)?;
        Ok(settings::window_from_stored(stored.as_deref()))
    }

    /// Change the auto-return window. Values outside the allowed range
    /// are rejected, never clamped into it.
    pub fn set_auto_return_minutes(&self, minutes: i64) -> Result<u32, CheckoutError> {
        let minutes = settings::validate_window(minutes)?;
        self.store
            .put_setting(settings::AUTO_RETURN_KEY, &minutes.to_string())?;
        info!(minutes, "Auto-return window updated");
        Ok(minutes)
    }

    /// Live checkouts, oldest first, for the board.
    pub fn active_board(&self, now: DateTime<Local>) -> Result<Vec<ReservationView>, CheckoutError> {
        let live = self.store.active_reservations()?;
        Ok(live.iter().map(|r| reservation_view(r, now)).collect())
    }

    pub fn board_snapshot(&self, now: DateTime<Local>) -> Result<BoardSnapshot, CheckoutError> {
        Ok(BoardSnapshot {
            api_version: API_VERSION,
            auto_return_minutes: self.auto_return_minutes()?,
            active: self.active_board(now)?,
        })
    }

    /// Open `OUT` audit rows. Reconciled to equal the live reservation
    /// set at steady state; serves as the fallback read path when the
    /// live table is unavailable to a reader.
    pub fn open_checkouts(&self) -> Result<Vec<AuditRecord>, CheckoutError> {
        Ok(self.store.open_audit_records()?)
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>, CheckoutError> {
        Ok(self.store.recent_audit_records(limit)?)
    }

    pub fn delete_audit_record(&self, id: i64) -> Result<usize, CheckoutError> {
        let removed = self.store.delete_audit_record(id)?;
        info!(id, removed, "Audit record deleted");
        Ok(removed)
    }

    pub fn delete_audit_records(&self, ids: &[i64]) -> Result<usize, CheckoutError> {
        let removed = self.store.delete_audit_records(ids)?;
        info!(requested = ids.len(), removed, "Audit records deleted");
        Ok(removed)
    }

    /// Delete audit rows by class snapshot. An empty label targets rows
    /// recorded for unassigned students.
    pub fn delete_audit_by_class(&self, class: &str) -> Result<usize, CheckoutError> {
        let removed = self.store.delete_audit_by_class(class)?;
        info!(class, removed, "Audit records deleted by class");
        Ok(removed)
    }

    pub fn delete_all_audit(&self) -> Result<usize, CheckoutError> {
        let removed = self.store.delete_all_audit()?;
        info!(removed, "Audit trail cleared");
        Ok(removed)
    }

    /// Ingest a roster row. Gender is canonicalized here, once, from the
    /// free text the roster supplies; the raw text is retained so a later
    /// renormalization can re-parse it. Upserts match on the normalized
    /// email and keep the existing student id.
    pub fn upsert_student(
        &self,
        name: &str,
        email: &str,
        gender_raw: &str,
        class: Option<&str>,
    ) -> Result<StudentRecord, CheckoutError> {
        let email = normalize_email(email);
        let candidate = StudentRecord {
            id: StudentId::new(),
            name: name.trim().to_string(),
            email: email.clone(),
            gender: Gender::parse(gender_raw),
            gender_raw: gender_raw.trim().to_string(),
            class: class
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        };
        self.store.upsert_student(&candidate)?;

        // Re-read so the caller sees the id that actually stuck
        self.store
            .get_student_by_email(&email)?
            .ok_or(CheckoutError::NotFound)
    }

    pub fn remove_student(&self, email: &str) -> Result<(), CheckoutError> {
        let email = normalize_email(email);
        if self.store.remove_student(&email)? {
            info!(student = %email, "Student removed from roster");
            Ok(())
        } else {
            Err(CheckoutError::NotFound)
        }
    }

    pub fn list_students(&self) -> Result<Vec<StudentRecord>, CheckoutError> {
        Ok(self.store.list_students()?)
    }

    /// Re-parse every student's retained raw gender text and rewrite the
    /// canonical column where it differs. Audit snapshots are never
    /// touched: history keeps the gender recorded at action time.
    pub fn normalize_genders(&self) -> Result<usize, CheckoutError> {
        let updated = self.store.normalize_stored_genders()?;
        info!(updated, "Roster genders renormalized");
        Ok(updated)
    }

    pub fn upsert_destination(&self, destination: &Destination) -> Result<(), CheckoutError> {
        self.store.upsert_destination(destination)?;
        debug!(destination = %destination.id, "Destination upserted");
        Ok(())
    }

    pub fn list_destinations(&self) -> Result<Vec<Destination>, CheckoutError> {
        Ok(self.store.list_destinations()?)
    }

    pub fn health(&self) -> HealthStatus {
        let store_ok = self.store.is_healthy();
        let active_reservations = if store_ok {
            self.store
                .active_reservations()
                .map(|r| r.len())
                .unwrap_or(0)
        } else {
            0
        };
        HealthStatus {
            live: true,
            ready: store_ok,
            store_ok,
            active_reservations,
        }
    }
}

fn reservation_view(r: &ActiveReservation, now: DateTime<Local>) -> ReservationView {
    ReservationView {
        reservation_id: r.id.clone(),
        student_name: r.student_name.clone(),
        student_email: r.student_email.clone(),
        gender: r.gender,
        class: r.class.clone(),
        destination_id: r.destination_id.clone(),
        destination_name: r.destination_name.clone(),
        checked_out_at: r.checked_out_at,
        deadline: r.deadline,
        note: r.note.clone(),
        minutes_out: whole_minutes_between(r.checked_out_at, now),
        overdue: r.deadline <= now,
    }
}
