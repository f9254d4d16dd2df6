//! The `error` module defines the error types used across the client.
//!
//! Handshake and connect failures are recovered by the client state machine
//! and never reach callers. What does reach callers (through a rejected
//! `Task`) is one of the variants of [`Error`].

use std::time::Duration;

use thiserror::Error;

use crate::client::State;
use crate::protocol::ProtocolError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The server answered with `successful: false`.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A local send or connect failure, no server involvement.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The scheduler gave up on the message.
    #[error("message delivery expired after {attempts} attempt(s)")]
    DeliveryExpired { attempts: u32 },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// An outgoing extension returned no message.
    #[error("message dropped by extension pipeline")]
    Dropped,
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Failures raised by a transport without any server involvement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport '{0}' is not usable for this endpoint")]
    Unusable(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("could not decode server response: {0}")]
    Decode(String),

    #[error("transport closed")]
    Closed,

    /// Every candidate transport failed, or none was usable.
    #[error("no usable transport: {0}")]
    NoTransport(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::Io(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransportError::Http {
                status: status.as_u16(),
            },
            None if err.is_connect() => TransportError::Connect(err.to_string()),
            None => TransportError::Io(err.to_string()),
        }
    }
}

/// An operation waited for a state the client never reached.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("expected client state {expected:?}, but it settled in {actual:?}")]
pub struct StateError {
    pub expected: State,
    pub actual: State,
}
