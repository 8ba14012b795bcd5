//! Tizen Remote - WebSocket remote control for Samsung smart TVs.
//!
//! This library keeps a persistent connection to the TV's remote-control
//! channel, sends key and text commands, and negotiates and caches the
//! pairing token the TV hands out.
//!
//! # Architecture
//!
//! - **Local End (Rust)**: [`RemoteClient`] drives one WebSocket connection
//! - **Remote End (TV)**: `samsung.remote.control` channel on port 8001/8002
//!
//! Key design principles:
//!
//! - Each [`RemoteClient`] owns at most one connection and its event loop
//! - Every listener on a connection is registered and removed explicitly
//! - Tokens are shared between processes through a locked on-disk cache
//! - Connection drops reconnect on their own with bounded retries
//!
//! # Quick Start
//!
//! ```no_run
//! use tizen_remote::{Key, RemoteClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = RemoteClient::builder()
//!         .host("192.168.1.20")
//!         .name("my-remote")
//!         .build()?;
//!
//!     // First run shows a pairing prompt on the TV
//!     client.connect().await?;
//!
//!     client.click(Key::Home).await?;
//!     client.text("hello").await?;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`RemoteClient`], builder, options, events |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Command encoder and channel messages |
//! | [`retry`] | Bounded retries with backoff |
//! | [`token`] | Token stores and cache lock |
//! | [`transport`] | WebSocket transport layer |

// ============================================================================
// Modules
// ============================================================================

/// Remote-control client.
///
/// Use [`RemoteClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Remote-control protocol message types.
pub mod protocol;

/// Connection retry policy.
pub mod retry;

/// Token persistence.
pub mod token;

/// WebSocket transport layer.
///
/// Connection event loop, listener registry and socket opener.
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    CapabilityProbe, ClientEvent, ClientOptions, ConnectOptions, ConnectionState,
    HttpCapabilityProbe, RemoteClient, RemoteClientBuilder, RequestOptions, SendOptions,
    TokenOptions,
};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{ChannelMessage, Key, KeyAction, RemoteCommand};

// Retry types
pub use retry::RetryPolicy;

// Token types
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};

// Transport types
pub use transport::{Transport, WsTransport};
