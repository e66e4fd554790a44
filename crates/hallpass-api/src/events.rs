//! Event types for hallpassd -> client streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{API_VERSION, AuditRecord, BoardSnapshot, ReservationView};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: hallpass_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full board snapshot, broadcast after every mutation. Clients that
    /// want the initial board issue `GetState` before subscribing.
    StateChanged(BoardSnapshot),

    /// A checkout was admitted
    ReservationOpened { reservation: ReservationView },

    /// A checkout was terminated; the closing audit record carries the
    /// action (IN, AUTO or RESET) and the computed duration
    ReservationClosed { record: AuditRecord },

    /// An auto-return pass finished
    SweepCompleted { closed: usize },

    /// The auto-return window was changed
    SettingsChanged { auto_return_minutes: u32 },

    /// Roster rows were added, removed or renormalized
    RosterChanged { student_count: usize },

    /// Service is shutting down
    Shutdown,
}
