//! Remote-control client.
//!
//! This module provides the main entry point for talking to a TV.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`RemoteClient`] | Connection state machine, commands, token handling |
//! | [`RemoteClientBuilder`] | Fluent configuration builder |
//! | [`ClientOptions`] | Client configuration |
//! | [`ClientEvent`] | Events published to subscribers |
//! | [`ConnectionState`] | Lifecycle state |
//! | [`CapabilityProbe`] | Token support query |
//!
//! # Example
//!
//! ```no_run
//! use tizen_remote::{ClientEvent, Key, RemoteClient, Result};
//!
//! # async fn example() -> Result<()> {
//! let client = RemoteClient::builder().host("192.168.1.20").build()?;
//! let mut events = client.subscribe();
//!
//! client.connect().await?;
//! client.click(Key::VolumeUp).await?;
//!
//! while let Ok(event) = events.try_recv() {
//!     if let ClientEvent::Token { token } = event {
//!         println!("paired, token {token}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for client configuration.
pub mod builder;

/// Core client implementation.
pub mod core;

/// Public client events.
pub mod events;

/// Client and per-call options.
pub mod options;

/// Request/response correlation.
mod pending;

/// Token capability probe.
pub mod probe;

/// Connection state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::RemoteClientBuilder;
pub use core::RemoteClient;
pub use events::ClientEvent;
pub use options::{ClientOptions, ConnectOptions, RequestOptions, SendOptions, TokenOptions};
pub use probe::{CapabilityProbe, HttpCapabilityProbe};
pub use state::ConnectionState;
