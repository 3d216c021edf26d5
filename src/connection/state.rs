//! Connection state.

use std::fmt;

/// Lifecycle state of a connection.
///
/// Transitions only move forward:
/// ```text
/// NotOpened ──► Connected ──┬──► Closed
///                           └──► Faulted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The receive loop has not been started.
    NotOpened,
    /// The receive loop is running.
    Connected,
    /// The peer closed the stream or the connection was disposed.
    Closed,
    /// The receive loop stopped on an error.
    Faulted,
}

impl ConnectionState {
    /// Whether no further transition can happen.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotOpened => "not opened",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ConnectionState::NotOpened.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Faulted.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::NotOpened.to_string(), "not opened");
        assert_eq!(ConnectionState::Faulted.to_string(), "faulted");
    }
}
