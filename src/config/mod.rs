//! Proxy configuration
//!
//! Configuration is deserialized from YAML. The embedding process decides
//! where the YAML comes from (file, environment, control plane); this
//! module only parses and validates it.

mod types;

pub use types::{BackendConfig, KeepaliveConfig, ProxyConfig, ServerConfig};

use std::path::Path;

use crate::error::Result;

/// Parse a configuration from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<ProxyConfig> {
    let config: ProxyConfig = serde_yaml::from_str(yaml)?;
    config
        .validate()
        .map_err(crate::error::ProxyError::Config)?;
    Ok(config)
}

/// Parse a configuration from a YAML file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_config() {
        let yaml = r#"
server:
  listen_port: 6000
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.server.listen_address, "127.0.0.1");
        assert_eq!(config.server.listen_port, 6000);
        assert!(!config.server.proxy_protocol);
        assert_eq!(config.backend.max_redirect_retries, 3);
    }

    #[test]
    fn test_load_full_config() {
        let yaml = r#"
server:
  listen_address: "0.0.0.0"
  listen_port: 6000
  connect_timeout_secs: 5
  drain_timeout_secs: 30
  max_connections: 100
  proxy_protocol: true

backend:
  max_redirect_retries: 5

keepalive:
  enabled: true
  idle_secs: 120
  interval_secs: 20
  count: 5
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert!(config.server.proxy_protocol);
        assert_eq!(config.backend.max_redirect_retries, 5);
        assert_eq!(config.keepalive.idle_secs, 120);
        assert_eq!(config.keepalive.count, 5);
    }

    #[test]
    fn test_invalid_tls_config_rejected() {
        let yaml = r#"
server:
  listen_port: 6000
  tls:
    enabled: true
"#;
        assert!(load_from_str(yaml).is_err());
    }
}
