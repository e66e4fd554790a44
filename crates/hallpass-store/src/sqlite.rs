//! SQLite-based store implementation

use chrono::{DateTime, Local};
use hallpass_api::{AuditAction, AuditRecord, Destination, Gender, StudentRecord};
use hallpass_util::{DestinationId, ReservationId, StudentId};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ActiveReservation, AdmitOutcome, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Roster
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                gender TEXT,
                gender_raw TEXT NOT NULL DEFAULT '',
                class TEXT
            );

            -- Destination catalog
            CREATE TABLE IF NOT EXISTS destinations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            -- Live reservations. Snapshot columns freeze the roster state
            -- at admission. student_id UNIQUE: one open checkout per
            -- student. The partial unique index below is the admission
            -- token: one open checkout per (class, gender); unassigned
            -- students (NULL class) are exempt.
            CREATE TABLE IF NOT EXISTS reservations (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL UNIQUE,
                student_name TEXT NOT NULL,
                student_email TEXT NOT NULL,
                gender TEXT NOT NULL,
                class TEXT,
                destination_id TEXT NOT NULL,
                destination_name TEXT NOT NULL,
                checked_out_at TEXT NOT NULL,
                deadline TEXT NOT NULL,
                note TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_slot
                ON reservations(class, gender) WHERE class IS NOT NULL;

            -- Audit trail (append-only; rows are removed, never updated)
            CREATE TABLE IF NOT EXISTS audit_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                reservation_id TEXT NOT NULL,
                student_name TEXT NOT NULL,
                student_email TEXT NOT NULL,
                gender TEXT NOT NULL,
                class TEXT,
                destination_name TEXT NOT NULL,
                action TEXT NOT NULL,
                checked_out_at TEXT NOT NULL,
                ended_at TEXT,
                duration_minutes INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_records(action);
            CREATE INDEX IF NOT EXISTS idx_audit_reservation ON audit_records(reservation_id);

            -- Settings key-value store
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_gender(s: &str) -> StoreResult<Gender> {
    Gender::parse(s).ok_or_else(|| StoreError::Corrupt(format!("bad gender '{}'", s)))
}

/// Reservation row as raw column values, parsed separately so SQL mapping
/// errors and data corruption stay distinguishable.
struct RawReservation {
    id: String,
    student_id: String,
    student_name: String,
    student_email: String,
    gender: String,
    class: Option<String>,
    destination_id: String,
    destination_name: String,
    checked_out_at: String,
    deadline: String,
    note: Option<String>,
}

const RESERVATION_COLUMNS: &str = "id, student_id, student_name, student_email, gender, class, \
     destination_id, destination_name, checked_out_at, deadline, note";

fn raw_reservation(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReservation> {
    Ok(RawReservation {
        id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        student_email: row.get(3)?,
        gender: row.get(4)?,
        class: row.get(5)?,
        destination_id: row.get(6)?,
        destination_name: row.get(7)?,
        checked_out_at: row.get(8)?,
        deadline: row.get(9)?,
        note: row.get(10)?,
    })
}

fn parse_reservation(raw: RawReservation) -> StoreResult<ActiveReservation> {
    Ok(ActiveReservation {
        id: ReservationId::parse(&raw.id)
            .ok_or_else(|| StoreError::Corrupt(format!("bad reservation id '{}'", raw.id)))?,
        student_id: StudentId::parse(&raw.student_id)
            .ok_or_else(|| StoreError::Corrupt(format!("bad student id '{}'", raw.student_id)))?,
        student_name: raw.student_name,
        student_email: raw.student_email,
        gender: parse_gender(&raw.gender)?,
        class: raw.class,
        destination_id: DestinationId::new(raw.destination_id),
        destination_name: raw.destination_name,
        checked_out_at: parse_ts(&raw.checked_out_at)?,
        deadline: parse_ts(&raw.deadline)?,
        note: raw.note,
    })
}

struct RawAudit {
    id: i64,
    reservation_id: String,
    student_name: String,
    student_email: String,
    gender: String,
    class: Option<String>,
    destination_name: String,
    action: String,
    checked_out_at: String,
    ended_at: Option<String>,
    duration_minutes: Option<i64>,
}

const AUDIT_COLUMNS: &str = "id, reservation_id, student_name, student_email, gender, class, \
     destination_name, action, checked_out_at, ended_at, duration_minutes";

fn raw_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAudit> {
    Ok(RawAudit {
        id: row.get(0)?,
        reservation_id: row.get(1)?,
        student_name: row.get(2)?,
        student_email: row.get(3)?,
        gender: row.get(4)?,
        class: row.get(5)?,
        destination_name: row.get(6)?,
        action: row.get(7)?,
        checked_out_at: row.get(8)?,
        ended_at: row.get(9)?,
        duration_minutes: row.get(10)?,
    })
}

fn parse_audit(raw: RawAudit) -> StoreResult<AuditRecord> {
    Ok(AuditRecord {
        id: raw.id,
        reservation_id: ReservationId::parse(&raw.reservation_id).ok_or_else(|| {
            StoreError::Corrupt(format!("bad reservation id '{}'", raw.reservation_id))
        })?,
        student_name: raw.student_name,
        student_email: raw.student_email,
        gender: parse_gender(&raw.gender)?,
        class: raw.class,
        destination_name: raw.destination_name,
        action: AuditAction::from_str(&raw.action)
            .ok_or_else(|| StoreError::Corrupt(format!("bad audit action '{}'", raw.action)))?,
        checked_out_at: parse_ts(&raw.checked_out_at)?,
        ended_at: raw.ended_at.as_deref().map(parse_ts).transpose()?,
        duration_minutes: raw.duration_minutes,
    })
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, Option<String>, String, Option<String>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn parse_student(
    (id, name, email, gender, gender_raw, class): (String, String, String, Option<String>, String, Option<String>),
) -> StoreResult<StudentRecord> {
    Ok(StudentRecord {
        id: StudentId::parse(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("bad student id '{}'", id)))?,
        name,
        email,
        gender: gender.as_deref().and_then(Gender::parse),
        gender_raw,
        class,
    })
}

/// Append one audit row inside the caller's transaction
fn insert_audit_row(
    tx: &Transaction<'_>,
    r: &ActiveReservation,
    action: AuditAction,
    ended_at: Option<DateTime<Local>>,
    duration_minutes: Option<i64>,
) -> StoreResult<i64> {
    tx.execute(
        "INSERT INTO audit_records (reservation_id, student_name, student_email, gender, class, \
         destination_name, action, checked_out_at, ended_at, duration_minutes) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            r.id.to_string(),
            r.student_name,
            r.student_email,
            r.gender.as_str(),
            r.class,
            r.destination_name,
            action.as_str(),
            r.checked_out_at.to_rfc3339(),
            ended_at.map(|t| t.to_rfc3339()),
            duration_minutes,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Map a unique-constraint violation on the reservations table to the
/// admission conflict it represents.
fn admit_conflict(e: &rusqlite::Error, gender: Gender) -> Option<AdmitOutcome> {
    if let rusqlite::Error::SqliteFailure(err, Some(msg)) = e
        && err.code == rusqlite::ErrorCode::ConstraintViolation
    {
        if msg.contains("reservations.student_id") {
            return Some(AdmitOutcome::StudentAlreadyOut);
        }
        if msg.contains("idx_reservations_slot") {
            return Some(AdmitOutcome::SlotTaken { gender });
        }
    }
    None
}

impl Store for SqliteStore {
    fn upsert_student(&self, student: &StudentRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO students (id, name, email, gender, gender_raw, class) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(email) DO UPDATE SET \
               name = excluded.name, \
               gender = excluded.gender, \
               gender_raw = excluded.gender_raw, \
               class = excluded.class",
            params![
                student.id.to_string(),
                student.name,
                student.email,
                student.gender.map(|g| g.as_str()),
                student.gender_raw,
                student.class,
            ],
        )?;

        debug!(email = %student.email, "Student upserted");
        Ok(())
    }

    fn remove_student(&self, email: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM students WHERE email = ?", [email])?;
        Ok(removed > 0)
    }

    fn get_student_by_email(&self, email: &str) -> StoreResult<Option<StudentRecord>> {
        let conn = self.conn.lock().unwrap();

        let raw = conn
            .query_row(
                "SELECT id, name, email, gender, gender_raw, class FROM students WHERE email = ?",
                [email],
                student_from_row,
            )
            .optional()?;

        raw.map(parse_student).transpose()
    }

    fn list_students(&self) -> StoreResult<Vec<StudentRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, name, email, gender, gender_raw, class FROM students ORDER BY name, email",
        )?;
        let rows = stmt.query_map([], student_from_row)?;

        let mut students = Vec::new();
        for row in rows {
            students.push(parse_student(row?)?);
        }
        Ok(students)
    }

    fn normalize_stored_genders(&self) -> StoreResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows: Vec<(String, Option<String>, String)> = {
            let mut stmt = tx.prepare("SELECT id, gender, gender_raw FROM students")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            mapped.collect::<Result<_, _>>()?
        };

        let mut updated = 0;
        for (id, stored, raw) in rows {
            let canonical = Gender::parse(&raw).map(|g| g.as_str().to_string());
            if canonical != stored {
                tx.execute(
                    "UPDATE students SET gender = ? WHERE id = ?",
                    params![canonical, id],
                )?;
                updated += 1;
            }
        }

        tx.commit()?;
        debug!(updated, "Stored genders renormalized");
        Ok(updated)
    }

    fn upsert_destination(&self, dest: &Destination) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO destinations (id, name, active, sort_order) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               name = excluded.name, \
               active = excluded.active, \
               sort_order = excluded.sort_order",
            params![dest.id.as_str(), dest.name, dest.active, dest.sort_order],
        )?;

        Ok(())
    }

    fn get_destination(&self, id: &DestinationId) -> StoreResult<Option<Destination>> {
        let conn = self.conn.lock().unwrap();

        let dest = conn
            .query_row(
                "SELECT id, name, active, sort_order FROM destinations WHERE id = ?",
                [id.as_str()],
                |row| {
                    Ok(Destination {
                        id: DestinationId::new(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        active: row.get(2)?,
                        sort_order: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(dest)
    }

    fn list_destinations(&self) -> StoreResult<Vec<Destination>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, name, active, sort_order FROM destinations ORDER BY sort_order, name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Destination {
                id: DestinationId::new(row.get::<_, String>(0)?),
                name: row.get(1)?,
                active: row.get(2)?,
                sort_order: row.get(3)?,
            })
        })?;

        let mut destinations = Vec::new();
        for row in rows {
            destinations.push(row?);
        }
        Ok(destinations)
    }

    fn admit(&self, r: &ActiveReservation) -> StoreResult<AdmitOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-checks inside the write transaction close the check-then-act
        // window; the unique constraints below are the cross-process backstop.
        let already: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM reservations WHERE student_id = ?",
                [r.student_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(AdmitOutcome::StudentAlreadyOut);
        }

        if let Some(class) = &r.class {
            let occupied: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM reservations WHERE class = ? AND gender = ?",
                    params![class, r.gender.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if occupied.is_some() {
                return Ok(AdmitOutcome::SlotTaken { gender: r.gender });
            }
        }

        let inserted = tx.execute(
            "INSERT INTO reservations (id, student_id, student_name, student_email, gender, \
             class, destination_id, destination_name, checked_out_at, deadline, note) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                r.id.to_string(),
                r.student_id.to_string(),
                r.student_name,
                r.student_email,
                r.gender.as_str(),
                r.class,
                r.destination_id.as_str(),
                r.destination_name,
                r.checked_out_at.to_rfc3339(),
                r.deadline.to_rfc3339(),
                r.note,
            ],
        );
        if let Err(e) = inserted {
            if let Some(outcome) = admit_conflict(&e, r.gender) {
                return Ok(outcome);
            }
            return Err(e.into());
        }

        insert_audit_row(&tx, r, AuditAction::Out, None, None)?;
        tx.commit()?;

        debug!(
            reservation_id = %r.id,
            student = %r.student_email,
            destination = %r.destination_id,
            "Reservation admitted"
        );
        Ok(AdmitOutcome::Admitted)
    }

    fn active_reservations(&self) -> StoreResult<Vec<ActiveReservation>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations ORDER BY checked_out_at, id"
        ))?;
        let rows = stmt.query_map([], raw_reservation)?;

        let mut reservations = Vec::new();
        for row in rows {
            reservations.push(parse_reservation(row?)?);
        }
        Ok(reservations)
    }

    fn active_for_student(&self, student_id: &StudentId) -> StoreResult<Option<ActiveReservation>> {
        let conn = self.conn.lock().unwrap();

        let raw = conn
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE student_id = ?"),
                [student_id.to_string()],
                raw_reservation,
            )
            .optional()?;

        raw.map(parse_reservation).transpose()
    }

    fn active_in_class(&self, class: &str) -> StoreResult<Vec<ActiveReservation>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE class = ? ORDER BY checked_out_at, id"
        ))?;
        let rows = stmt.query_map([class], raw_reservation)?;

        let mut reservations = Vec::new();
        for row in rows {
            reservations.push(parse_reservation(row?)?);
        }
        Ok(reservations)
    }

    fn expired_reservations(&self, now: DateTime<Local>) -> StoreResult<Vec<ActiveReservation>> {
        // Deadlines are compared after parsing. RFC3339 strings with mixed
        // UTC offsets do not sort chronologically.
        let all = self.active_reservations()?;
        Ok(all.into_iter().filter(|r| r.deadline <= now).collect())
    }

    fn finalize_reservation(
        &self,
        id: &ReservationId,
        action: AuditAction,
        now: DateTime<Local>,
    ) -> StoreResult<Option<AuditRecord>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let raw = tx
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?"),
                [id.to_string()],
                raw_reservation,
            )
            .optional()?;
        let Some(raw) = raw else {
            // Another finalizer won the race; a no-op, not an error.
            return Ok(None);
        };
        let reservation = parse_reservation(raw)?;

        let deleted = tx.execute("DELETE FROM reservations WHERE id = ?", [id.to_string()])?;
        if deleted == 0 {
            return Ok(None);
        }

        let duration =
            hallpass_util::whole_minutes_between(reservation.checked_out_at, now);
        let record_id = insert_audit_row(&tx, &reservation, action, Some(now), Some(duration))?;
        tx.execute(
            "DELETE FROM audit_records WHERE reservation_id = ? AND action = 'OUT'",
            [id.to_string()],
        )?;
        tx.commit()?;

        debug!(
            reservation_id = %id,
            action = %action,
            duration_minutes = duration,
            "Reservation finalized"
        );

        Ok(Some(AuditRecord {
            id: record_id,
            reservation_id: reservation.id,
            student_name: reservation.student_name,
            student_email: reservation.student_email,
            gender: reservation.gender,
            class: reservation.class,
            destination_name: reservation.destination_name,
            action,
            checked_out_at: reservation.checked_out_at,
            ended_at: Some(now),
            duration_minutes: Some(duration),
        }))
    }

    fn recent_audit_records(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records ORDER BY id DESC LIMIT ?"
        ))?;
        let rows = stmt.query_map([limit], raw_audit)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(parse_audit(row?)?);
        }
        Ok(records)
    }

    fn open_audit_records(&self) -> StoreResult<Vec<AuditRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records WHERE action = 'OUT' ORDER BY checked_out_at, id"
        ))?;
        let rows = stmt.query_map([], raw_audit)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(parse_audit(row?)?);
        }
        Ok(records)
    }

    fn delete_audit_record(&self, id: i64) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM audit_records WHERE id = ?", [id])?;
        Ok(removed)
    }

    fn delete_audit_records(&self, ids: &[i64]) -> StoreResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut removed = 0;
        for id in ids {
            removed += tx.execute("DELETE FROM audit_records WHERE id = ?", [id])?;
        }

        tx.commit()?;
        Ok(removed)
    }

    fn delete_audit_by_class(&self, class: &str) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();

        let removed = if class.trim().is_empty() {
            conn.execute("DELETE FROM audit_records WHERE class IS NULL", [])?
        } else {
            conn.execute("DELETE FROM audit_records WHERE class = ?", [class])?
        };

        Ok(removed)
    }

    fn delete_all_audit(&self) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM audit_records", [])?;
        Ok(removed)
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let value: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(value)
    }

    fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;

        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
