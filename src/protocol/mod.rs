//! Remote-control protocol message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RemoteCommand` | Local → TV | Key or text command (`ms.remote.control`) |
//! | `ChannelMessage` | TV → Local | Channel event (`ms.channel.*`, responses) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outgoing command encoder |
//! | `key` | `KEY_*` code constants |
//! | `message` | Inbound channel messages |

// ============================================================================
// Submodules
// ============================================================================

/// Outgoing command encoder.
pub mod command;

/// Remote-control key codes.
pub mod key;

/// Inbound channel messages.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{KeyAction, REMOTE_CONTROL_METHOD, RemoteCommand, RemoteParams, RemoteType};
pub use key::Key;
pub use message::{ChannelMessage, TIMEOUT_CHANNEL, TOKEN_CHANNEL};
