//! Error types for the remote-control client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use tizen_remote::{Key, RemoteClient, Result};
//!
//! async fn example(client: &RemoteClient) -> Result<()> {
//!     client.connect().await?;
//!     client.click(Key::Enter).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Handshake`], [`Error::RetriesExhausted`], [`Error::ConnectAborted`], [`Error::NotConnected`], [`Error::AbnormalClose`], [`Error::ConnectionClosed`] |
//! | Token | [`Error::TokenTimeout`], [`Error::CacheLock`] |
//! | Messaging | [`Error::Serialization`], [`Error::RequestTimeout`], [`Error::ChannelBusy`], [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes the host, URL or channel it concerns.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket handshake failed or did not complete in time.
    #[error("Handshake with {url} failed: {message}")]
    Handshake {
        /// Endpoint URL (token redacted).
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// Every connection attempt failed.
    ///
    /// Wraps the error of the last attempt.
    #[error("Cannot connect to {url} after {attempts} attempts, giving up: {source}")]
    RetriesExhausted {
        /// Endpoint URL (token redacted).
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        source: Box<Error>,
    },

    /// Connection attempt was cancelled by `disconnect()`.
    #[error("Connection to {url} aborted by disconnect")]
    ConnectAborted {
        /// Endpoint URL (token redacted).
        url: String,
    },

    /// Operation needs a connection and connecting was not allowed.
    #[error("Not connected to {host}")]
    NotConnected {
        /// Device host.
        host: String,
    },

    /// Socket closed with an abnormal close code.
    ///
    /// Only reported through the `error` event.
    #[error("Connection to {host} closed abnormally (code {code})")]
    AbnormalClose {
        /// Device host.
        host: String,
        /// WebSocket close code.
        code: u16,
    },

    /// WebSocket connection closed while an operation was waiting on it.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Token Errors
    // ========================================================================
    /// Device did not hand out a token within the negotiation budget.
    #[error("Timed out after {timeout_ms}ms waiting for a token from {host}")]
    TokenTimeout {
        /// Device host.
        host: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Token cache lock could not be acquired or used.
    #[error("Token cache lock {path} failed: {message}")]
    CacheLock {
        /// Lock file path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    /// Outgoing payload could not be serialized to JSON.
    #[error("Cannot serialize payload: {message}")]
    Serialization {
        /// Serializer error message.
        message: String,
    },

    /// No response arrived on a channel in time.
    #[error("Request on channel {channel} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Channel the response was expected on.
        channel: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Another request is already waiting on this channel.
    #[error("A request on channel {channel} is already in flight")]
    ChannelBusy {
        /// The busy channel.
        channel: String,
    },

    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error from the capability probe.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a handshake error.
    #[inline]
    pub fn handshake(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a retries-exhausted error wrapping the last attempt's error.
    #[inline]
    pub fn retries_exhausted(url: impl Into<String>, attempts: u32, source: Error) -> Self {
        Self::RetriesExhausted {
            url: url.into(),
            attempts,
            source: Box::new(source),
        }
    }

    /// Creates a connect-aborted error.
    #[inline]
    pub fn connect_aborted(url: impl Into<String>) -> Self {
        Self::ConnectAborted { url: url.into() }
    }

    /// Creates a not-connected error.
    #[inline]
    pub fn not_connected(host: impl Into<String>) -> Self {
        Self::NotConnected { host: host.into() }
    }

    /// Creates an abnormal close error.
    #[inline]
    pub fn abnormal_close(host: impl Into<String>, code: u16) -> Self {
        Self::AbnormalClose {
            host: host.into(),
            code,
        }
    }

    /// Creates a token timeout error.
    #[inline]
    pub fn token_timeout(host: impl Into<String>, timeout: Duration) -> Self {
        Self::TokenTimeout {
            host: host.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Creates a cache lock error.
    #[inline]
    pub fn cache_lock(path: &Path, message: impl Into<String>) -> Self {
        Self::CacheLock {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[inline]
    pub fn serialization(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(channel: impl Into<String>, timeout: Duration) -> Self {
        Self::RequestTimeout {
            channel: channel.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Creates a channel busy error.
    #[inline]
    pub fn channel_busy(channel: impl Into<String>) -> Self {
        Self::ChannelBusy {
            channel: channel.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TokenTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Handshake { .. }
                | Self::RetriesExhausted { .. }
                | Self::ConnectAborted { .. }
                | Self::NotConnected { .. }
                | Self::AbnormalClose { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if another connection attempt may succeed.
    ///
    /// Aborted attempts and configuration errors are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ConnectAborted { .. } | Self::Config { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::handshake("ws://10.0.0.2:8001/api", "connection refused");
        assert_eq!(
            err.to_string(),
            "Handshake with ws://10.0.0.2:8001/api failed: connection refused"
        );
    }

    #[test]
    fn test_retries_exhausted_names_cause() {
        let err = Error::retries_exhausted(
            "wss://tv:8002/api",
            3,
            Error::handshake("wss://tv:8002/api", "timed out"),
        );
        let message = err.to_string();

        assert!(message.contains("after 3 attempts"));
        assert!(message.contains("giving up"));
        assert!(message.contains("timed out"));
    }

    #[test]
    fn test_is_timeout() {
        let token_err = Error::token_timeout("tv", Duration::from_secs(30));
        let request_err = Error::request_timeout("ping", Duration::from_millis(1));
        let other_err = Error::not_connected("tv");

        assert!(token_err.is_timeout());
        assert!(request_err.is_timeout());
        assert!(!other_err.is_timeout());
        assert_eq!(token_err.to_string(), "Timed out after 30000ms waiting for a token from tv");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(Error::not_connected("tv").is_connection_error());
        assert!(Error::abnormal_close("tv", 1006).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::handshake("ws://tv", "refused").is_retryable());
        assert!(!Error::connect_aborted("ws://tv").is_retryable());
        assert!(!Error::config("bad host").is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
