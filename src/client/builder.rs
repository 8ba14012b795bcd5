//! Builder pattern for client configuration.
//!
//! Provides a fluent API for configuring and creating [`RemoteClient`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use tizen_remote::RemoteClient;
//!
//! # fn example() -> tizen_remote::Result<()> {
//! let client = RemoteClient::builder()
//!     .host("192.168.1.20")
//!     .name("living-room-bot")
//!     .retries(4)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::token::{FileTokenStore, TokenStore};
use crate::transport::{Transport, WsTransport};

use super::core::RemoteClient;
use super::options::ClientOptions;
use super::probe::{CapabilityProbe, HttpCapabilityProbe};

// ============================================================================
// RemoteClientBuilder
// ============================================================================

/// Builder for configuring a [`RemoteClient`].
///
/// Use [`RemoteClient::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct RemoteClientBuilder {
    /// Client options.
    options: ClientOptions,
    /// Custom transport.
    transport: Option<Arc<dyn Transport>>,
    /// Custom token store.
    token_store: Option<Arc<dyn TokenStore>>,
    /// Custom capability probe.
    probe: Option<Arc<dyn CapabilityProbe>>,
}

// ============================================================================
// RemoteClientBuilder Implementation
// ============================================================================

impl RemoteClientBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from existing options.
    #[inline]
    #[must_use]
    pub fn from_options(options: ClientOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Sets the device host name or IP address.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Sets the remote-control port (default 8002).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Forces `wss` (`true`) or `ws` (`false`) regardless of port.
    #[inline]
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.options.secure = Some(secure);
        self
    }

    /// Sets the client name shown in the TV's pairing prompt.
    #[inline]
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Sets a known token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.options.token = Some(token.into());
        self
    }

    /// Enables or disables token persistence (default enabled).
    #[inline]
    #[must_use]
    pub fn persist_token(mut self, persist: bool) -> Self {
        self.options.persist_token = persist;
        self
    }

    /// Sets the token cache file.
    #[inline]
    #[must_use]
    pub fn token_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.token_cache = Some(path.into());
        self
    }

    /// Replaces the token store. Ignored when persistence is disabled.
    #[inline]
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Replaces the socket transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the token capability probe.
    #[inline]
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets the number of extra connection attempts (default 2).
    #[inline]
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retry.retries = retries;
        self
    }

    /// Sets the delay before the first retry (default 500ms).
    #[inline]
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry.base_delay = delay;
        self
    }

    /// Enables or disables auto-reconnect (default enabled).
    #[inline]
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.options.auto_reconnect = enabled;
        self
    }

    /// Sets the handshake deadline (default 10s).
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    /// Sets the token negotiation deadline (default 30s).
    #[inline]
    #[must_use]
    pub fn token_timeout(mut self, timeout: Duration) -> Self {
        self.options.token_timeout = timeout;
        self
    }

    /// Enables TLS certificate verification (default disabled).
    #[inline]
    #[must_use]
    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.options.verify_certificates = verify;
        self
    }

    /// Sets the device-info API port used by the probe (default 8001).
    #[inline]
    #[must_use]
    pub fn probe_port(mut self, port: u16) -> Self {
        self.options.probe_port = port;
        self
    }

    /// Builds the client with validation.
    ///
    /// Does not connect.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the options are invalid
    ///   or no token cache location exists
    /// - [`Error::Http`](crate::Error::Http) if the default probe cannot be built
    pub fn build(self) -> Result<RemoteClient> {
        self.options.validate()?;

        let store = self.resolve_store()?;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(WsTransport::new().verify_certificates(self.options.verify_certificates))
        });
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpCapabilityProbe::new(self.options.probe_port)?),
        };

        Ok(RemoteClient::from_parts(self.options, transport, store, probe))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl RemoteClientBuilder {
    /// Picks the token store; `None` disables persistence.
    fn resolve_store(&self) -> Result<Option<Arc<dyn TokenStore>>> {
        if !self.options.persist_token {
            return Ok(None);
        }
        if let Some(store) = &self.token_store {
            return Ok(Some(Arc::clone(store)));
        }

        let store = match &self.options.token_cache {
            Some(path) => FileTokenStore::new(path),
            None => FileTokenStore::at_default_location()?,
        };
        Ok(Some(Arc::new(store)))
    }
}

// ============================================================================
// Tests
// ============================================================================
