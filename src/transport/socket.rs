//! Opening WebSocket connections to the TV.
//!
//! # Connection Flow
//!
//! 1. Client computes the endpoint URL (`ws://` or `wss://`)
//! 2. [`Transport::open`] performs the TCP/TLS/WebSocket handshake within a deadline
//! 3. The resulting [`Connection`] spawns its event loop
//!
//! TVs serve `wss://` with self-signed certificates, so [`WsTransport`]
//! skips certificate verification unless asked to verify.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::time::timeout;
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

use super::Connection;

// ============================================================================
// Transport
// ============================================================================

/// Opens connections.
///
/// The client only talks to sockets through this trait, so tests and
/// embedders can substitute their own.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the socket is not open within
    /// `handshake_timeout` or the handshake fails.
    async fn open(&self, url: &Url, handshake_timeout: Duration) -> Result<Connection>;
}

// ============================================================================
// WsTransport
// ============================================================================

/// tokio-tungstenite transport.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    /// Verify TLS certificates against webpki roots.
    verify_certificates: bool,
}

impl WsTransport {
    /// Creates a transport that accepts self-signed TV certificates.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether TLS certificates are verified.
    #[inline]
    #[must_use]
    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.verify_certificates = verify;
        self
    }

    /// Picks the connector for the URL scheme.
    fn connector(&self, url: &Url) -> Result<Option<Connector>> {
        if url.scheme() != "wss" {
            return Ok(Some(Connector::Plain));
        }
        if self.verify_certificates {
            // tokio-tungstenite falls back to webpki roots.
            return Ok(None);
        }
        Ok(Some(Connector::Rustls(Arc::new(insecure_tls_config()?))))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url, handshake_timeout: Duration) -> Result<Connection> {
        let redacted = redact_url(url);
        let connector = self.connector(url)?;

        debug!(url = %redacted, timeout_ms = handshake_timeout.as_millis() as u64, "Opening WebSocket");

        let handshake = connect_async_tls_with_config(url.as_str(), None, false, connector);
        let (ws_stream, _response) = timeout(handshake_timeout, handshake)
            .await
            .map_err(|_| {
                Error::handshake(
                    &redacted,
                    format!("no open event within {}ms", handshake_timeout.as_millis()),
                )
            })?
            .map_err(|e| Error::handshake(&redacted, e.to_string()))?;

        info!(url = %redacted, "WebSocket connection established");

        Ok(Connection::new(redacted, ws_stream))
    }
}

// ============================================================================
// URL Redaction
// ============================================================================

/// Returns the URL with the `token` query value masked.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == "token") {
        return url.to_string();
    }

    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" { "***".into() } else { value };
            (key.into_owned(), value.into_owned())
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

// ============================================================================
// TLS
// ============================================================================

/// Builds a rustls config that accepts any server certificate.
fn insecure_tls_config() -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("TLS setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth();
    Ok(config)
}

/// Certificate verifier for self-signed TV certificates.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[test]
    fn test_redact_token() {
        let url = Url::parse("wss://10.0.0.2:8002/api/v2/channels/samsung.remote.control?name=dHY%3D&token=secret")
            .expect("valid url");
        let redacted = redact_url(&url);

        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("token=***") || redacted.contains("token=%2A%2A%2A"));
        assert!(redacted.contains("name=dHY%3D"));
    }

    #[test]
    fn test_redact_without_token_is_identity() {
        let url = Url::parse("ws://tv:8001/api/v2/channels/x?name=abc").expect("valid url");
        assert_eq!(redact_url(&url), url.to_string());
    }

    #[test]
    fn test_insecure_tls_config_builds() {
        assert!(insecure_tls_config().is_ok());
    }

    #[test]
    fn test_connector_by_scheme() {
        let transport = WsTransport::new();
        let plain = Url::parse("ws://tv:8001/").expect("valid url");
        let secure = Url::parse("wss://tv:8002/").expect("valid url");

        assert!(matches!(transport.connector(&plain), Ok(Some(Connector::Plain))));
        assert!(matches!(transport.connector(&secure), Ok(Some(Connector::Rustls(_)))));
        assert!(matches!(
            transport.verify_certificates(true).connector(&secure),
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        // Accepts TCP but never answers the upgrade request.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let _held = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).expect("valid url");
        let err = WsTransport::new()
            .open(&url, Duration::from_millis(50))
            .await
            .expect_err("should time out");

        assert!(matches!(err, Error::Handshake { .. }));
        assert!(err.to_string().contains("no open event"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_handshake_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}/")).expect("valid url");
        let err = WsTransport::new()
            .open(&url, Duration::from_secs(2))
            .await
            .expect_err("should fail");

        assert!(matches!(err, Error::Handshake { .. }));
    }
}
