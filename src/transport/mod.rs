//! WebSocket transport layer.
//!
//! This module handles communication between the local end (Rust) and
//! the TV's remote-control channel via WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  RemoteClient   │                              │  TV             │
//! │                 │         WebSocket            │                 │
//! │  Transport      │─────────────────────────────►│  samsung.remote │
//! │  → Connection   │◄─────────────────────────────│  .control       │
//! │                 │      host:8001 / host:8002   │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Transport::open` - Handshake with the TV within a deadline
//! 2. `Connection::on` - Attach listeners, each returning a `ListenerId`
//! 3. `Connection::send_text` - Send commands, receive channel messages
//! 4. `Connection::close` - Close handshake; close listeners fire once
//! 5. `Connection::remove_all_listeners` - Detach everything on teardown
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `listeners` | Listener registry and transport events |
//! | `socket` | Connection opener and TLS setup |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Listener registry and transport events.
pub mod listeners;

/// Connection opener.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use listeners::{
    ABNORMAL_CLOSURE, CloseInfo, EventKind, Listener, ListenerId, ListenerRegistry,
    NO_STATUS_RECEIVED, TransportEvent,
};
pub use socket::{Transport, WsTransport, redact_url};
