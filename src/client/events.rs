//! Public client events.
//!
//! Events are fanned out over a tokio broadcast channel. Subscribe with
//! [`RemoteClient::subscribe`](super::RemoteClient::subscribe); drop the
//! receiver to unsubscribe. Slow receivers lose the oldest events.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

// ============================================================================
// Constants
// ============================================================================

/// Events buffered per receiver.
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// ClientEvent
// ============================================================================

/// Event emitted by a [`RemoteClient`](super::RemoteClient).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Before the first connection attempt.
    Connecting,
    /// Connected (and token negotiated, if needed).
    Connect {
        /// Endpoint URL, token redacted.
        url: String,
    },
    /// Before retry number `attempt`.
    Retry {
        /// Retry number, starting at 1.
        attempt: u32,
    },
    /// `disconnect()` started closing the socket.
    Disconnecting,
    /// Socket closed without error.
    Disconnect,
    /// Error outside any caller's `Result`, e.g. a failed auto-reconnect.
    Error {
        /// Error message.
        message: String,
    },
    /// A new token was received.
    Token {
        /// The token.
        token: String,
    },
    /// A payload was written to the socket.
    Sent {
        /// The payload.
        payload: Value,
    },
}

impl ClientEvent {
    /// Returns the event name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connect { .. } => "connect",
            Self::Retry { .. } => "retry",
            Self::Disconnecting => "disconnecting",
            Self::Disconnect => "disconnect",
            Self::Error { .. } => "error",
            Self::Token { .. } => "token",
            Self::Sent { .. } => "sent",
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Broadcast sender for client events.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    /// Publishes an event. Having no subscribers is fine.
    pub(crate) fn emit(&self, event: ClientEvent) {
        trace!(event = event.name(), receivers = self.tx.receiver_count(), "Emitting event");
        let _ = self.tx.send(event);
    }

    /// Returns a new receiver.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
