//! OS-level TCP keepalive tuning

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::config::KeepaliveConfig;
use crate::error::{ProxyError, Result};

/// Apply keepalive settings to a TCP socket.
///
/// With `enabled: false` keepalive probing is turned off entirely.
pub fn apply(stream: &TcpStream, cfg: &KeepaliveConfig) -> Result<()> {
    let sock = SockRef::from(stream);

    if !cfg.enabled {
        sock.set_keepalive(false).map_err(ProxyError::Io)?;
        return Ok(());
    }

    let mut keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(cfg.idle_secs))
        .with_interval(Duration::from_secs(cfg.interval_secs));
    #[cfg(not(windows))]
    {
        keepalive = keepalive.with_retries(cfg.count);
    }

    sock.set_tcp_keepalive(&keepalive).map_err(ProxyError::Io)
}
