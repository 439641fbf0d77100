//! TLS Connector for client-side TLS connections
//!
//! Establishes TLS-encrypted connections to backend MySQL servers.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::tls::{load_certificates, load_private_key, TlsClientConfig, TlsError, TlsVerifyMode};

/// TLS Connector for establishing TLS connections to backends
///
/// Wraps `tokio_rustls::TlsConnector` with configuration loading
/// and error handling.
///
/// # Example
///
/// ```ignore
/// let config = TlsClientConfig {
///     enabled: true,
///     verify_mode: TlsVerifyMode::Verify,
///     ca_path: Some("/path/to/ca.crt".into()),
///     ..Default::default()
/// };
///
/// let connector = TlsConnector::new(&config)?;
/// let tls_stream = connector.connect(tcp_stream, "db.example.com").await?;
/// ```
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector from configuration
    ///
    /// Loads CA certificates and optionally client certificates from the
    /// paths specified in the configuration. With
    /// [`TlsVerifyMode::None`] the server certificate is not verified at
    /// all.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - CA certificate file cannot be read or parsed
    /// - Client certificate/key cannot be read or parsed
    /// - TLS configuration is invalid
    pub fn new(config: &TlsClientConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;

        let provider = rustls::crypto::ring::default_provider();

        let builder = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("failed to set protocol versions: {}", e)))?;

        let builder = match config.verify_mode {
            TlsVerifyMode::None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification)),
            TlsVerifyMode::Verify => {
                let root_store = build_root_store(config)?;
                builder.with_root_certificates(root_store)
            }
        };

        let client_config = if let (Some(cert_path), Some(key_path)) =
            (&config.client_cert_path, &config.client_key_path)
        {
            // Mutual TLS
            let certs = load_certificates(cert_path)?;
            if certs.is_empty() {
                return Err(TlsError::cert_load(
                    cert_path,
                    "no certificates found in file",
                ));
            }

            let key = load_private_key(key_path)?;

            builder.with_client_auth_cert(certs, key).map_err(|e| {
                TlsError::config(format!("failed to build client TLS config: {}", e))
            })?
        } else {
            builder.with_no_client_auth()
        };

        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

        Ok(Self { inner: connector })
    }

    /// Connect to a backend over TLS
    ///
    /// Performs the TLS handshake with the server. The `server_name` is
    /// used for SNI and certificate verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails, certificate
    /// verification fails, or the server name is invalid.
    pub async fn connect(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<TlsStream<TcpStream>, TlsError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::config(format!("invalid server name: {}", server_name)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::handshake(e.to_string()))
    }
}

/// Build the root certificate store based on configuration
fn build_root_store(config: &TlsClientConfig) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &config.ca_path {
        let certs = load_certificates(ca_path)?;
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| TlsError::cert_load(ca_path, e.to_string()))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(root_store)
}

/// Custom certificate verifier that accepts any certificate
///
/// **WARNING**: This is insecure and should only be used for testing.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
