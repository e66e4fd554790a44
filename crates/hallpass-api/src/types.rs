//! Shared types for the hallpassd API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use hallpass_util::{DestinationId, ReservationId, StudentId};
use std::fmt;

/// Canonical gender used for capacity slots.
///
/// Roster data arrives as uncontrolled text ("F", "girl", "Female ").
/// [`Gender::parse`] canonicalizes once at the ingestion boundary; every
/// capacity decision operates on this two-value enum only. Unparseable
/// text means the student cannot be admitted, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Canonicalize free-text gender. Returns `None` for anything that
    /// doesn't clearly name one of the two values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "m" | "b" | "male" | "boy" | "man" => Some(Gender::Male),
            "f" | "g" | "female" | "girl" | "woman" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal (or open) state of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// Open checkout, no termination yet
    Out,
    /// Manual check-in
    In,
    /// Closed by the auto-return sweep
    Auto,
    /// Closed by an administrative reset
    Reset,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Out => "OUT",
            AuditAction::In => "IN",
            AuditAction::Auto => "AUTO",
            AuditAction::Reset => "RESET",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OUT" => Some(AuditAction::Out),
            "IN" => Some(AuditAction::In),
            "AUTO" => Some(AuditAction::Auto),
            "RESET" => Some(AuditAction::Reset),
            _ => None,
        }
    }

    /// Whether this action closes a reservation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuditAction::Out)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A roster row as stored. The raw gender text is retained alongside the
/// canonical value so re-normalization can run after the synonym table
/// improves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: StudentId,
    pub name: String,
    /// Normalized (trimmed, lowercased) and unique
    pub email: String,
    /// Canonical gender, `None` when the raw text didn't parse
    pub gender: Option<Gender>,
    /// The gender text as ingested, before canonicalization
    pub gender_raw: String,
    /// Free-text class label, `None` = unassigned
    pub class: Option<String>,
}

/// A destination in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    /// Inactive destinations are rejected at checkout
    pub active: bool,
    /// Display ordering hint, ascending
    pub sort_order: i64,
}

/// One row of the immutable audit trail. Student and destination fields
/// are snapshots taken at action time, never live references, so later
/// roster edits or deletions cannot rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    /// Reservation this row belongs to; ties an open `OUT` row to the
    /// closing row that supersedes it
    pub reservation_id: ReservationId,
    pub student_name: String,
    pub student_email: String,
    pub gender: Gender,
    pub class: Option<String>,
    pub destination_name: String,
    pub action: AuditAction,
    /// When the checkout this row describes began
    pub checked_out_at: DateTime<Local>,
    /// Termination time; `None` while the checkout is open
    pub ended_at: Option<DateTime<Local>>,
    /// Whole minutes away, floored; `None` while open
    pub duration_minutes: Option<i64>,
}

/// View of one active reservation for dashboards and kiosks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationView {
    pub reservation_id: ReservationId,
    pub student_name: String,
    pub student_email: String,
    pub gender: Gender,
    pub class: Option<String>,
    pub destination_id: DestinationId,
    pub destination_name: String,
    pub checked_out_at: DateTime<Local>,
    pub deadline: DateTime<Local>,
    pub note: Option<String>,
    /// Whole minutes elapsed at snapshot time
    pub minutes_out: i64,
    /// Past the auto-return deadline at snapshot time
    pub overdue: bool,
}

/// Per-gender slot availability for one class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub male_available: bool,
    pub female_available: bool,
}

impl Availability {
    /// Both slots free; the result for an empty class label.
    pub fn open() -> Self {
        Self {
            male_available: true,
            female_available: true,
        }
    }

    pub fn is_available(&self, gender: Gender) -> bool {
        match gender {
            Gender::Male => self.male_available,
            Gender::Female => self.female_available,
        }
    }
}

/// Full board snapshot for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub api_version: u32,
    pub auto_return_minutes: u32,
    pub active: Vec<ReservationView>,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Teacher dashboard - full control including roster, settings, resets
    Teacher,
    /// Student-facing kiosk - can check out/in and read the board
    Kiosk,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_check_out(&self) -> bool {
        matches!(self, ClientRole::Teacher | ClientRole::Kiosk)
    }

    pub fn can_reset(&self) -> bool {
        matches!(self, ClientRole::Teacher)
    }

    pub fn can_edit_settings(&self) -> bool {
        matches!(self, ClientRole::Teacher)
    }

    pub fn can_sweep(&self) -> bool {
        matches!(self, ClientRole::Teacher)
    }

    pub fn can_manage_roster(&self) -> bool {
        matches!(self, ClientRole::Teacher)
    }

    pub fn can_delete_audit(&self) -> bool {
        matches!(self, ClientRole::Teacher)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub active_reservations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_parse_synonyms() {
        assert_eq!(Gender::parse("F"), Some(Gender::Female));
        assert_eq!(Gender::parse("girl"), Some(Gender::Female));
        assert_eq!(Gender::parse("Female "), Some(Gender::Female));
        assert_eq!(Gender::parse(" m"), Some(Gender::Male));
        assert_eq!(Gender::parse("BOY"), Some(Gender::Male));
        assert_eq!(Gender::parse("Male"), Some(Gender::Male));

        assert_eq!(Gender::parse(""), None);
        assert_eq!(Gender::parse("unknown"), None);
        assert_eq!(Gender::parse("x"), None);
    }

    #[test]
    fn gender_serializes_to_canonical_text() {
        let json = serde_json::to_string(&Gender::Female).unwrap();
        assert_eq!(json, "\"Female\"");
        let parsed: Gender = serde_json::from_str("\"Male\"").unwrap();
        assert_eq!(parsed, Gender::Male);
    }

    #[test]
    fn audit_action_round_trips_as_str() {
        for action in [
            AuditAction::Out,
            AuditAction::In,
            AuditAction::Auto,
            AuditAction::Reset,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::from_str("bogus"), None);
    }

    #[test]
    fn audit_action_terminal() {
        assert!(!AuditAction::Out.is_terminal());
        assert!(AuditAction::In.is_terminal());
        assert!(AuditAction::Auto.is_terminal());
        assert!(AuditAction::Reset.is_terminal());
    }

    #[test]
    fn availability_lookup_by_gender() {
        let avail = Availability {
            male_available: true,
            female_available: false,
        };
        assert!(avail.is_available(Gender::Male));
        assert!(!avail.is_available(Gender::Female));
        assert!(Availability::open().is_available(Gender::Female));
    }

    #[test]
    fn role_capabilities() {
        assert!(ClientRole::Teacher.can_reset());
        assert!(ClientRole::Kiosk.can_check_out());
        assert!(!ClientRole::Kiosk.can_reset());
        assert!(!ClientRole::Kiosk.can_sweep());
        assert!(!ClientRole::Observer.can_check_out());
        assert!(!ClientRole::Observer.can_manage_roster());
    }
}
