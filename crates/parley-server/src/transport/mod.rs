//! Live transport capability.
//!
//! The relay and the presence registry never touch sockets. They push events
//! to a [`ConnectionHandle`] through [`LiveTransport`], which either accepts
//! the event for delivery or reports why it could not. Production wires this
//! to [`ConnectionHub`] (one outbound queue per QUIC connection); tests use
//! [`RecordingTransport`].

mod hub;
mod quic;
mod recording;

pub use hub::ConnectionHub;
use parley_proto::{
    Payload,
    replies::{Deliver, StatusChanged},
};
pub use quic::{QuinnConnection, QuinnTransport};
pub use recording::RecordingTransport;
use thiserror::Error;

/// Opaque identifier of one live connection.
///
/// Random per accepted connection. Never reused while the process runs (with
/// overwhelming probability).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Server-initiated event for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A user came online or went offline
    Status(StatusChanged),
    /// A message arrived for the connected user
    Deliver(Deliver),
}

impl PushEvent {
    /// Wire payload for this event.
    pub fn into_payload(self) -> Payload {
        match self {
            Self::Status(inner) => Payload::StatusChanged(inner),
            Self::Deliver(inner) => Payload::Deliver(inner),
        }
    }
}

/// Why a push was not accepted.
///
/// Push failures are never surfaced to the sender of a message; callers log
/// them and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// No such connection, or it is shutting down
    #[error("connection closed")]
    Closed,

    /// Outbound queue for the connection is full
    #[error("outbound queue full")]
    Full,

    /// Event could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Capability to push an event to a live connection.
///
/// Must not block: implementations enqueue and return.
pub trait LiveTransport: Send + Sync + 'static {
    /// Enqueue `event` for the connection behind `handle`.
    ///
    /// # Errors
    ///
    /// - `PushError::Closed` if the connection is gone
    /// - `PushError::Full` if the connection is not draining its queue
    /// - `PushError::Encode` if the event cannot be framed
    fn push(&self, handle: ConnectionHandle, event: PushEvent) -> Result<(), PushError>;
}
