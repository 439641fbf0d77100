//! Backend selection seam

use async_trait::async_trait;

use crate::error::Result;
use crate::tls::TlsConnector;

use super::SessionState;

/// A backend picked by a [`BackendSelector`]: a network address plus the
/// TLS policy for reaching it.
#[derive(Clone)]
pub struct BackendTarget {
    /// Backend host name or address
    pub host: String,
    /// Backend port
    pub port: u16,
    /// TLS connector when the backend requires an encrypted connection
    pub tls: Option<TlsConnector>,
}

impl BackendTarget {
    /// Create a plain-TCP target.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    /// Attach a TLS policy (builder pattern).
    pub fn with_tls(mut self, connector: TlsConnector) -> Self {
        self.tls = Some(connector);
        self
    }

    /// The dialable `host:port` form of this target.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Trait for pluggable backend selection.
///
/// The proxy asks the selector for an address both when a session first
/// connects and every time a session is re-bound. Load balancing policy,
/// topology awareness, and health checking all live behind this seam.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to work with Tokio's
/// multi-threaded runtime.
#[async_trait]
pub trait BackendSelector: Send + Sync {
    /// Yield the backend the given session should connect to.
    ///
    /// `session` is `None` for the very first connection of a session,
    /// before any handshake has completed.
    async fn next(&self, session: Option<&SessionState>) -> Result<BackendTarget>;
}
