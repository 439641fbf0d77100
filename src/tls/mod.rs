//! TLS/SSL support for roamdb-proxy
//!
//! This module provides TLS functionality for:
//! - **Server-side TLS**: Accepting encrypted connections from MySQL clients
//! - **Client-side TLS**: Connecting to backend MySQL servers over encrypted
//!   connections
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐        TLS        ┌───────────┐        TLS        ┌──────────┐
//! │  Client  │ ───────────────── │   Proxy   │ ───────────────── │  MySQL   │
//! │ (MySQL)  │   (server-side)   │           │   (client-side)   │ Backend  │
//! └──────────┘                   └───────────┘                   └──────────┘
//! ```
//!
//! Both sides upgrade mid-stream: the MySQL handshake starts in cleartext
//! and switches to TLS when the SSL capability is negotiated.
//!
//! # Security
//!
//! - Uses rustls (pure Rust TLS implementation) for memory safety
//! - TLS 1.2 minimum, TLS 1.3 preferred
//! - Certificate verification enabled by default

mod acceptor;
mod config;
mod connector;
mod error;

pub use acceptor::TlsAcceptor;
pub use config::{TlsClientConfig, TlsServerConfig, TlsVerifyMode};
pub use connector::TlsConnector;
pub use error::TlsError;

// Shared utilities for loading certificates and keys
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates from a PEM file
///
/// Reads all certificates from a PEM-encoded file and returns them as
/// a vector of `CertificateDer`. This supports certificate chains.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    Ok(certs)
}

/// Load a private key from a PEM file
///
/// Reads a private key from a PEM-encoded file. Supports RSA, PKCS8, and EC keys.
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}
