//! Client configuration and per-call options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tizen_remote::ClientOptions;
//!
//! let options = ClientOptions::new("192.168.1.20")
//!     .with_name("living-room-bot")
//!     .with_retries(4)
//!     .with_token_timeout(Duration::from_secs(60));
//!
//! let url = options.endpoint_url(None)?;
//! // wss://192.168.1.20:8002/api/v2/channels/samsung.remote.control?name=bGl2aW5nLXJvb20tYm90
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default remote-control port (TLS).
pub const DEFAULT_PORT: u16 = 8002;

/// Port that implies `wss` when the scheme is not forced.
pub const SECURE_PORT: u16 = 8002;

/// Port of the device-info HTTP API.
pub const DEFAULT_PROBE_PORT: u16 = 8001;

/// Remote-control channel path.
pub const REMOTE_CONTROL_PATH: &str = "/api/v2/channels/samsung.remote.control";

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the user to accept the pairing prompt.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ClientOptions
// ============================================================================

/// Remote client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Device host name or IP address.
    pub host: String,

    /// Remote-control port.
    pub port: u16,

    /// Force `wss` (`Some(true)`) or `ws` (`Some(false)`); by port otherwise.
    pub secure: Option<bool>,

    /// Client name shown on the TV; defaults to the host.
    pub name: Option<String>,

    /// Token to start with.
    pub token: Option<String>,

    /// Persist tokens to the token store.
    pub persist_token: bool,

    /// Token cache file; the user cache directory by default.
    pub token_cache: Option<PathBuf>,

    /// Reconnect after an abnormal close.
    pub auto_reconnect: bool,

    /// Connection retry policy.
    pub retry: RetryPolicy,

    /// WebSocket handshake deadline.
    pub handshake_timeout: Duration,

    /// Token negotiation deadline.
    pub token_timeout: Duration,

    /// Verify TLS certificates (TVs use self-signed ones).
    pub verify_certificates: bool,

    /// Port of the device-info API used by the capability probe.
    pub probe_port: u16,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            secure: None,
            name: None,
            token: None,
            persist_token: true,
            token_cache: None,
            auto_reconnect: true,
            retry: RetryPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            verify_certificates: false,
            probe_port: DEFAULT_PROBE_PORT,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientOptions {
    /// Creates options for `host` with default settings.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ClientOptions {
    /// Sets the remote-control port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Forces `wss` or `ws`.
    #[inline]
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Sets the client name shown on the TV.
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the starting token.
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Disables token persistence.
    #[inline]
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.persist_token = false;
        self
    }

    /// Sets the token cache file.
    #[inline]
    #[must_use]
    pub fn with_token_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_cache = Some(path.into());
        self
    }

    /// Disables auto-reconnect.
    #[inline]
    #[must_use]
    pub fn without_auto_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Sets the number of extra connection attempts.
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    /// Sets the delay before the first retry.
    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    /// Sets the handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the token negotiation deadline.
    #[inline]
    #[must_use]
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    /// Enables TLS certificate verification.
    #[inline]
    #[must_use]
    pub fn with_verified_certificates(mut self) -> Self {
        self.verify_certificates = true;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ClientOptions {
    /// Returns `true` if the endpoint uses `wss`.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure.unwrap_or(self.port == SECURE_PORT)
    }

    /// Returns the client id: base64 of the name, or of the host.
    #[must_use]
    pub fn client_id(&self) -> String {
        STANDARD.encode(self.name.as_deref().unwrap_or(&self.host))
    }

    /// Builds the remote-control endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL.
    pub fn endpoint_url(&self, token: Option<&str>) -> Result<Url> {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        let base = format!("{scheme}://{}:{}{REMOTE_CONTROL_PATH}", self.host, self.port);
        let mut url = Url::parse(&base)
            .map_err(|e| Error::config(format!("Invalid host {:?}: {e}", self.host)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("name", &self.client_id());
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }

        Ok(url)
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is missing or unusable, or
    /// a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config(
                "Device host is required. Use .host() to set it.\n\
                 Example: RemoteClient::builder().host(\"192.168.1.20\")",
            ));
        }

        if self.handshake_timeout.is_zero() || self.token_timeout.is_zero() {
            return Err(Error::config("Timeouts must be greater than zero"));
        }

        let url = self.endpoint_url(None)?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::config(format!("Invalid host {:?}", self.host)));
        }

        Ok(())
    }
}

// ============================================================================
// Call Options
// ============================================================================

/// Options for [`RemoteClient::connect_with`](super::RemoteClient::connect_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Skip token loading and negotiation.
    pub no_token: bool,
}

/// Options for [`RemoteClient::send_with`](super::RemoteClient::send_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Fail with `NotConnected` instead of connecting.
    pub no_connect: bool,
    /// Skip token negotiation if connecting.
    pub no_token: bool,
}

/// Options for [`RemoteClient::send_request`](super::RemoteClient::send_request).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Response deadline; waits until the socket closes if `None`.
    pub timeout: Option<Duration>,
    /// Fail with `NotConnected` instead of connecting.
    pub no_connect: bool,
    /// Skip token negotiation if connecting.
    pub no_token: bool,
}

impl RequestOptions {
    /// Options with a response deadline.
    #[inline]
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

/// Options for [`RemoteClient::get_token_with`](super::RemoteClient::get_token_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenOptions {
    /// Negotiate even if a token is known.
    pub force: bool,
    /// Fail with `NotConnected` instead of connecting.
    pub no_connect: bool,
}

// ============================================================================
// Tests
// ============================================================================
