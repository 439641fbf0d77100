//! TLS Acceptor for server-side TLS connections
//!
//! Upgrades incoming TCP connections to TLS-encrypted connections. Used
//! for accepting encrypted connections from MySQL clients.

use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::tls::{load_certificates, load_private_key, TlsError, TlsServerConfig};

/// TLS Acceptor for upgrading TCP connections to TLS
///
/// Wraps `tokio_rustls::TlsAcceptor` with configuration loading
/// and error handling.
///
/// # Example
///
/// ```ignore
/// let config = TlsServerConfig {
///     enabled: true,
///     cert_path: Some("/path/to/cert.pem".into()),
///     key_path: Some("/path/to/key.pem".into()),
/// };
///
/// let acceptor = TlsAcceptor::new(&config)?;
/// let tls_stream = acceptor.accept(tcp_stream).await?;
/// ```
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Create a new TLS acceptor from configuration
    ///
    /// Loads the server certificate and private key from the paths
    /// specified in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `cert_path` or `key_path` is not specified
    /// - Certificate file cannot be read or parsed
    /// - Private key file cannot be read or parsed
    /// - TLS configuration is invalid
    pub fn new(config: &TlsServerConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;

        let cert_path = config
            .cert_path
            .as_ref()
            .ok_or_else(|| TlsError::config("cert_path is required"))?;

        let key_path = config
            .key_path
            .as_ref()
            .ok_or_else(|| TlsError::config("key_path is required"))?;

        let certs = load_certificates(cert_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(
                cert_path,
                "no certificates found in file",
            ));
        }

        let key = load_private_key(key_path)?;

        let provider = rustls::crypto::ring::default_provider();

        let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("failed to set protocol versions: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::config(format!("failed to build TLS config: {}", e)))?;

        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

        Ok(Self { inner: acceptor })
    }

    /// Upgrade a TCP stream to TLS
    ///
    /// Performs the TLS handshake with the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails or the client
    /// disconnects during the handshake.
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::handshake(e.to_string()))
    }
}
