//! Error types for procwire-rpc.

use std::sync::Arc;

use thiserror::Error;

use crate::codec::CoercionError;

/// A fault shared between every waiter that observes it.
pub type SharedError = Arc<ProcwireError>;

/// Main error type for all procwire operations.
#[derive(Debug, Error)]
pub enum ProcwireError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (unknown frame kind, unroutable frame, oversize frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Endpoint configuration rejected before connecting.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The endpoint was not built for the requested role.
    #[error("Endpoint is not configured to {0}")]
    NotConfigured(&'static str),

    /// The receive loop was started a second time.
    #[error("Connection can only be started once")]
    AlreadyStarted,

    /// An operation was invoked before the connection was established.
    #[error("Can only invoke operations after the connection is established")]
    NotOpened,

    /// An operation was invoked after the connection closed.
    #[error("Cannot invoke operations after the connection has closed")]
    AlreadyClosed,

    /// An operation was invoked after the connection faulted.
    #[error("Cannot invoke operation, connection has faulted: {0}")]
    Faulted(#[source] SharedError),

    /// The connection ended with an error.
    #[error("Connection closed with error: {0}")]
    Connection(#[source] SharedError),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The operation ran on the peer and failed there.
    #[error("Remote invocation failed: {0}")]
    RemoteInvocation(String),

    /// A received value could not be converted to the expected type.
    #[error("Decode error: {0}")]
    Decode(#[from] CoercionError),

    /// A local wait was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ProcwireError {
    /// Whether this error was caused by misuse of the connection rather than
    /// by the peer or the transport.
    pub fn is_usage_fault(&self) -> bool {
        matches!(
            self,
            ProcwireError::AlreadyStarted
                | ProcwireError::NotOpened
                | ProcwireError::AlreadyClosed
                | ProcwireError::Faulted(_)
        )
    }

    /// Whether this is the connection-class error handed to close waiters.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ProcwireError::Connection(_))
    }

    /// The underlying fault for wrapped connection errors, or `self`.
    pub fn root(&self) -> &ProcwireError {
        match self {
            ProcwireError::Connection(inner) | ProcwireError::Faulted(inner) => inner.root(),
            other => other,
        }
    }
}

/// Result type alias using ProcwireError.
pub type Result<T> = std::result::Result<T, ProcwireError>;
