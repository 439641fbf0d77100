//! TLS configuration types
//!
//! - `TlsServerConfig` for accepting TLS connections from clients
//! - `TlsClientConfig` for connecting to backend servers over TLS

use serde::Deserialize;
use std::path::PathBuf;

/// Server-side TLS configuration (proxy accepting client connections)
///
/// When enabled, the SSL capability is advertised to clients and they may
/// upgrade the connection during the handshake.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsServerConfig {
    /// Enable TLS for client connections
    #[serde(default)]
    pub enabled: bool,

    /// Path to server certificate in PEM format
    ///
    /// Presented to clients during TLS handshake. Should be signed by a CA
    /// trusted by clients, or be self-signed for development.
    pub cert_path: Option<PathBuf>,

    /// Path to server private key in PEM format
    pub key_path: Option<PathBuf>,
}

/// Client-side TLS configuration (proxy connecting to a backend)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for backend connections
    #[serde(default)]
    pub enabled: bool,

    /// Certificate verification mode
    #[serde(default)]
    pub verify_mode: TlsVerifyMode,

    /// Path to CA certificate bundle in PEM format
    ///
    /// Used to verify the backend server's certificate. If not specified,
    /// the built-in webpki roots are used.
    pub ca_path: Option<PathBuf>,

    /// Path to client certificate in PEM format (optional, for mutual TLS)
    pub client_cert_path: Option<PathBuf>,

    /// Path to client private key in PEM format (optional, for mutual TLS)
    pub client_key_path: Option<PathBuf>,
}

/// Certificate verification mode for client-side TLS
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerifyMode {
    /// Full verification: CA chain + hostname match
    #[default]
    Verify,

    /// No verification (INSECURE - development only!)
    ///
    /// WARNING: Any certificate will be accepted, including self-signed
    /// and expired ones.
    None,
}

impl TlsServerConfig {
    /// Validate the server TLS configuration
    ///
    /// Returns an error if TLS is enabled but required paths are missing.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.cert_path.is_none() {
                return Err("TLS enabled but cert_path not specified".to_string());
            }
            if self.key_path.is_none() {
                return Err("TLS enabled but key_path not specified".to_string());
            }
        }
        Ok(())
    }
}

impl TlsClientConfig {
    /// Validate the client TLS configuration
    ///
    /// Returns an error if a client cert is specified but the key is
    /// missing, or vice versa.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(
                "client_cert_path and client_key_path must both be specified or both omitted"
                    .to_string(),
            );
        }
        Ok(())
    }
}
