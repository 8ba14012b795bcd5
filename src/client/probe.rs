//! Token capability probe.
//!
//! Older firmware never hands out tokens. When negotiation fails, the
//! client asks the device-info API whether tokens are supported at all:
//!
//! ```text
//! GET http://{host}:8001/api/v2/
//! { "device": { "TokenAuthSupport": "true" } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;

use super::options::DEFAULT_PROBE_PORT;

// ============================================================================
// Constants
// ============================================================================

/// Device-info request deadline.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// CapabilityProbe
// ============================================================================

/// Answers whether a device uses token authentication.
#[async_trait]
pub trait CapabilityProbe: Send + Sync + fmt::Debug {
    /// Returns `true` if `host` supports token authentication.
    async fn supports_token(&self, host: &str) -> Result<bool>;
}

// ============================================================================
// HttpCapabilityProbe
// ============================================================================

#[derive(Debug, Deserialize)]
struct DeviceInfo {
    #[serde(default)]
    device: DeviceDetails,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceDetails {
    #[serde(rename = "TokenAuthSupport", default)]
    token_auth_support: Option<String>,
}

/// Probe backed by the device-info HTTP API.
#[derive(Debug, Clone)]
pub struct HttpCapabilityProbe {
    http: reqwest::Client,
    port: u16,
}

impl HttpCapabilityProbe {
    /// Creates a probe for the device-info API on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the HTTP client cannot be built.
    pub fn new(port: u16) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self { http, port })
    }

    /// Creates a probe for the default port.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the HTTP client cannot be built.
    pub fn with_default_port() -> Result<Self> {
        Self::new(DEFAULT_PROBE_PORT)
    }

    fn info_url(&self, host: &str) -> String {
        format!("http://{host}:{}/api/v2/", self.port)
    }
}

#[async_trait]
impl CapabilityProbe for HttpCapabilityProbe {
    async fn supports_token(&self, host: &str) -> Result<bool> {
        let url = self.info_url(host);
        let info: DeviceInfo = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let supported = info.device.token_auth_support.as_deref() == Some("true");
        debug!(%host, supported, "Token capability probed");
        Ok(supported)
    }
}

// ============================================================================
// Tests
// ============================================================================
