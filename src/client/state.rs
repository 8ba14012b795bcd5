//! Client connection state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a [`RemoteClient`](super::RemoteClient).
///
/// ```text
/// Disconnected → Connecting → Connected → Disconnecting → Disconnected
///                    ↑            │
///                    └────────────┘  abnormal close, auto-reconnect
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Opening a socket, possibly retrying.
    Connecting,
    /// Socket open.
    Connected,
    /// Close handshake in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Returns the state name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
