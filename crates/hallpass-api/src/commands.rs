//! Command types for the hallpassd protocol

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Local};
use hallpass_util::{ClientId, DestinationId, ReservationId, StudentId};

use crate::{API_VERSION, ClientRole};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    /// Unknown student
    NotFound,
    /// Student already has an open checkout
    AlreadyOut,
    /// Gender missing or unparseable, capacity cannot be evaluated
    NoGenderOnFile,
    /// The (class, gender) slot is occupied
    CapacityExceeded,
    /// Destination missing or inactive
    InvalidDestination,
    /// Check-in with no open checkout
    NotCheckedOut,
    /// Settings value outside the allowed range
    OutOfRange,
    PermissionDenied,
    RateLimited,
    /// Durable store failure; details stay in server logs
    StoreUnavailable,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get the full board state
    GetState,

    /// Check a student out to a destination
    CheckOut {
        email: String,
        destination_id: DestinationId,
        #[serde(default)]
        note: Option<String>,
    },

    /// Check a student back in
    CheckIn { email: String },

    /// Terminate every open checkout (teacher only)
    ResetAll,

    /// Per-gender slot availability for a class. An empty label means
    /// unassigned students, which never occupy a slot.
    Availability { class: String },

    /// List open checkouts
    ListActive,

    /// Run an auto-return pass now
    Sweep,

    /// Get the auto-return window
    GetSettings,

    /// Set the auto-return window (teacher only)
    SetSettings { auto_return_minutes: i64 },

    // Roster management (teacher only)

    /// Insert or update a roster row, keyed by normalized email
    UpsertStudent {
        name: String,
        email: String,
        /// Free text, canonicalized on ingestion
        gender: String,
        #[serde(default)]
        class: Option<String>,
    },

    /// Remove a roster row
    RemoveStudent { email: String },

    /// List the roster
    ListStudents,

    /// Re-canonicalize stored genders from their retained raw text.
    /// Audit snapshots are historical and stay untouched.
    NormalizeGenders,

    // Destination catalog (teacher only)

    /// Insert or update a destination
    UpsertDestination {
        id: DestinationId,
        name: String,
        #[serde(default = "default_true")]
        active: bool,
        #[serde(default)]
        sort_order: i64,
    },

    /// List the destination catalog, including inactive entries
    ListDestinations,

    // Audit trail

    /// Read recent audit records, newest first
    ListAudit {
        #[serde(default)]
        limit: Option<u32>,
    },

    /// Delete one audit record (teacher only)
    DeleteAuditRecord { id: i64 },

    /// Delete a set of audit records (teacher only)
    DeleteAuditRecords { ids: Vec<i64> },

    /// Delete all audit records snapshotted with a class label (teacher only)
    DeleteAuditByClass { class: String },

    /// Delete the entire audit trail (teacher only)
    DeleteAllAudit,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

fn default_true() -> bool {
    true
}

/// Response payloads
///
/// Adjacently tagged: internal tagging cannot represent the list
/// payloads (a tag field cannot be injected into a JSON array), so
/// their serialization would fail at runtime and the daemon would
/// silently drop the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponsePayload {
    State(crate::BoardSnapshot),
    CheckedOut {
        reservation_id: ReservationId,
        destination_name: String,
        deadline: DateTime<Local>,
        /// Human-readable confirmation naming the destination
        message: String,
    },
    CheckedIn {
        duration_minutes: i64,
        message: String,
    },
    ResetComplete {
        count: usize,
    },
    Availability(crate::Availability),
    Active(Vec<crate::ReservationView>),
    SweepComplete {
        closed: usize,
    },
    Settings {
        auto_return_minutes: u32,
    },
    StudentUpserted {
        id: StudentId,
    },
    StudentRemoved,
    Students(Vec<crate::StudentRecord>),
    GendersNormalized {
        updated: usize,
    },
    DestinationUpserted,
    Destinations(Vec<crate::Destination>),
    AuditRecords(Vec<crate::AuditRecord>),
    AuditDeleted {
        removed: usize,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(crate::HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            1,
            Command::CheckOut {
                email: "alice@school.edu".into(),
                destination_id: DestinationId::new("bathroom"),
                note: None,
            },
        );
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::CheckOut { .. }));
        assert!(json.contains("check_out"));
    }

    #[test]
    fn optional_command_fields_default() {
        let json = r#"{"request_id":7,"api_version":1,"command":{"type":"check_out","email":"a@b.c","destination_id":"office"}}"#;
        let parsed: Request = serde_json::from_str(json).unwrap();
        match parsed.command {
            Command::CheckOut { note, .. } => assert!(note.is_none()),
            other => panic!("unexpected command: {:?}", other),
        }

        let json = r#"{"request_id":8,"api_version":1,"command":{"type":"upsert_destination","id":"office","name":"Office"}}"#;
        let parsed: Request = serde_json::from_str(json).unwrap();
        match parsed.command {
            Command::UpsertDestination {
                active, sort_order, ..
            } => {
                assert!(active);
                assert_eq!(sort_order, 0);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn response_serialization() {
        let resp = Response::success(
            1,
            ResponsePayload::CheckedIn {
                duration_minutes: 4,
                message: "Welcome back".into(),
            },
        );

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        match parsed.result {
            ResponseResult::Ok(ResponsePayload::CheckedIn {
                duration_minutes, ..
            }) => assert_eq!(duration_minutes, 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn error_codes_serialize_snake_case() {
        let err = ErrorInfo::new(ErrorCode::CapacityExceeded, "Female slot taken");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("capacity_exceeded"));
    }
}
