// src/core/errors.rs

//! Defines the error types of the gateway.
//!
//! Errors are split by where they are surfaced: connect, disconnect and command
//! errors become response payloads on the client's stream, driver errors come
//! from backend implementations, and `GatewayError` covers transport-level
//! failures that end a session.

use std::sync::Arc;
use thiserror::Error;

/// Failures of a `connect` request, reported as `ConnectResponse { success: false }`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("rejected: {0}")]
    Rejected(String),

    /// The session is already bound to a different address.
    #[error("already bound to {0}")]
    AlreadyBound(String),

    #[error("session is closed")]
    SessionTerminated,
}

/// Failures of a `disconnect` request, reported as `DisconnectResponse { success: false }`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("not found")]
    NotFound,

    /// A connection exists for the address but this session holds no reference to it.
    #[error("not bound to {0}")]
    NotBound(String),

    #[error("session is closed")]
    SessionTerminated,
}

/// Failures of a single command, reported as a normal `CommandResponse` whose
/// output carries the error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR no connection: connect to a database first")]
    NoConnection,

    #[error("ERR backend failure: {0}")]
    BackendFailure(String),

    #[error("ERR session is closed")]
    SessionTerminated,
}

/// Errors produced by a `BackendDriver` or one of its handles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Failure(String),
}

impl From<DriverError> for ConnectError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Unreachable(s) => ConnectError::Unreachable(s),
            DriverError::Rejected(s) => ConnectError::Rejected(s),
            // Nothing usable is left behind by a failed open.
            DriverError::Failure(s) => ConnectError::Unreachable(s),
        }
    }
}

impl From<DriverError> for CommandError {
    fn from(e: DriverError) -> Self {
        CommandError::BackendFailure(e.to_string())
    }
}

/// Transport-level errors. Any of these terminates the affected session, and
/// only that session.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Malformed envelope: {0}")]
    Protocol(String),

    #[error("Frame exceeds the maximum size of {0} bytes")]
    FrameTooLarge(usize),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// `std::io::Error` is not cloneable, so the IO variant shares it through an Arc.
impl Clone for GatewayError {
    fn clone(&self) -> Self {
        match self {
            GatewayError::Io(e) => GatewayError::Io(Arc::clone(e)),
            GatewayError::Protocol(s) => GatewayError::Protocol(s.clone()),
            GatewayError::FrameTooLarge(n) => GatewayError::FrameTooLarge(*n),
            GatewayError::Internal(s) => GatewayError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GatewayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GatewayError::Io(e1), GatewayError::Io(e2)) => e1.to_string() == e2.to_string(),
            (GatewayError::Protocol(s1), GatewayError::Protocol(s2)) => s1 == s2,
            (GatewayError::FrameTooLarge(n1), GatewayError::FrameTooLarge(n2)) => n1 == n2,
            (GatewayError::Internal(s1), GatewayError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}

impl From<std::str::Utf8Error> for GatewayError {
    fn from(e: std::str::Utf8Error) -> Self {
        GatewayError::Protocol(format!("invalid UTF-8: {e}"))
    }
}

impl From<DriverError> for GatewayError {
    fn from(e: DriverError) -> Self {
        GatewayError::Internal(e.to_string())
    }
}
