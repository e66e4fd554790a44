//! IPC layer for hallpassd
//!
//! Kiosks, dashboards and schedulers talk to the daemon over a Unix
//! domain socket carrying newline-delimited JSON: one `Request` per
//! line in, one `Response` per line out, plus broadcast `Event` lines
//! for subscribed clients. Peer UID decides the client's role.

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server error: {0}")]
    ServerError(String),

    /// The lock-step stream returned a response for some other request.
    #[error("response for request {got} while waiting on request {sent}")]
    RequestIdMismatch { sent: u64, got: u64 },
}

pub type IpcResult<T> = Result<T, IpcError>;
