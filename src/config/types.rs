//! Configuration types

use serde::Deserialize;
use std::time::Duration;

use crate::tls::TlsServerConfig;

/// Root configuration structure
///
/// # Example YAML
///
/// ```yaml
/// server:
///   listen_port: 6000
///   tls:
///     enabled: true
///     cert_path: "/path/to/server.crt"
///     key_path: "/path/to/server.key"
///
/// backend:
///   max_redirect_retries: 3
///
/// keepalive:
///   enabled: true
///   idle_secs: 60
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Backend connection configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// TCP keepalive settings applied to both sides of a session
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

impl ProxyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.server.tls.validate()?;
        if self.backend.max_redirect_retries == 0 {
            return Err("backend.max_redirect_retries must be at least 1".to_string());
        }
        Ok(())
    }

    /// Timeout for dialing a backend
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }

    /// How long a session may keep running after a shutdown signal before
    /// its connections are hard-closed
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.server.drain_timeout_secs)
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Port to listen on (0 = OS-assigned)
    #[serde(default)]
    pub listen_port: u16,
    /// Backend connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Graceful shutdown drain time in seconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    /// Maximum number of concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Expect a PROXY protocol v1/v2 preamble on client connections
    #[serde(default)]
    pub proxy_protocol: bool,
    /// TLS configuration for accepting client connections
    #[serde(default)]
    pub tls: TlsServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: 0,
            connect_timeout_secs: default_connect_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            max_connections: default_max_connections(),
            proxy_protocol: false,
            tls: TlsServerConfig::default(),
        }
    }
}

/// Backend connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// How many fresh backends to try when re-binding a session before
    /// giving up and reporting an error to the client
    #[serde(default = "default_max_redirect_retries")]
    pub max_redirect_retries: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_redirect_retries: default_max_redirect_retries(),
        }
    }
}

/// TCP keepalive settings
///
/// Applied to the raw socket of each connection. Applying the same value
/// twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeepaliveConfig {
    /// Enable TCP keepalive probes
    #[serde(default = "default_keepalive_enabled")]
    pub enabled: bool,
    /// Idle time before the first probe, in seconds
    #[serde(default = "default_keepalive_idle")]
    pub idle_secs: u64,
    /// Interval between probes, in seconds
    #[serde(default = "default_keepalive_interval")]
    pub interval_secs: u64,
    /// Number of unanswered probes before the connection is dropped
    #[serde(default = "default_keepalive_count")]
    pub count: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: default_keepalive_enabled(),
            idle_secs: default_keepalive_idle(),
            interval_secs: default_keepalive_interval(),
            count: default_keepalive_count(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_drain_timeout() -> u64 {
    15
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_redirect_retries() -> usize {
    3
}

fn default_keepalive_enabled() -> bool {
    true
}

fn default_keepalive_idle() -> u64 {
    60
}

fn default_keepalive_interval() -> u64 {
    10
}

fn default_keepalive_count() -> u32 {
    3
}
