//! Error types for roamdb-proxy

use thiserror::Error;

use crate::tls::TlsError;

/// Main error type for the proxy
///
/// Transport-level failures keep their `std::io::Error` cause attached as
/// a source so diagnostics can walk the full chain while user-facing
/// messages stay short.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Reading from a connection failed
    #[error("failed to read from connection: {0}")]
    ReadConn(#[source] std::io::Error),

    /// Writing to a connection failed
    #[error("failed to write to connection: {0}")]
    WriteConn(#[source] std::io::Error),

    /// Flushing buffered data to a connection failed
    #[error("failed to flush connection: {0}")]
    FlushConn(#[source] std::io::Error),

    /// Closing a connection failed
    #[error("failed to close connection: {0}")]
    CloseConn(#[source] std::io::Error),

    /// A packet header carried an unexpected sequence number.
    /// The peer is desynchronized; the connection must be torn down.
    #[error("invalid packet sequence, expected {expected}, got {actual}")]
    InvalidSequence {
        /// The sequence number the local side expected
        expected: u8,
        /// The sequence number found in the header
        actual: u8,
    },

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Authentication failed end-to-end
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A peer requires an auth plugin the proxy cannot satisfy
    #[error("unsupported auth plugin: {0}")]
    AuthPluginUnsupported(String),

    /// Re-binding the session to a new backend failed
    #[error("session redirect failed: {0}")]
    RedirectFailed(String),

    /// Protocol parsing error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error outside the packet path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Timeout error
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}
