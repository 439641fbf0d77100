//! TCP listener for incoming client connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use super::connection::ClientConnection;
use crate::auth::{BackendSelector, TokenIssuer};
use crate::config::ProxyConfig;
use crate::error::Result;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to limit
    pub connections_rejected: AtomicU64,
}

/// TCP listener that accepts incoming MySQL client connections and runs
/// one [`ClientConnection`] task per session.
pub struct Listener {
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    selector: Arc<dyn BackendSelector>,
    issuer: Arc<dyn TokenIssuer>,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address and create a new listener.
    pub async fn bind(
        config: Arc<ProxyConfig>,
        selector: Arc<dyn BackendSelector>,
        issuer: Arc<dyn TokenIssuer>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = format!(
            "{}:{}",
            config.server.listen_address, config.server.listen_port
        );

        let listener = TcpListener::bind(&addr).await?;

        // Connection limit semaphore (0 = unlimited)
        let connection_semaphore = if config.server.max_connections > 0 {
            info!(
                "listening on {} (max {} connections)",
                addr, config.server.max_connections
            );
            Some(Arc::new(Semaphore::new(config.server.max_connections)))
        } else {
            info!("listening on {} (unlimited connections)", addr);
            None
        };

        Ok(Self {
            listener,
            config,
            selector,
            issuer,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until a shutdown signal arrives.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = if let Some(ref semaphore) = self.connection_semaphore {
                                match semaphore.clone().try_acquire_owned() {
                                    Ok(permit) => Some(permit),
                                    Err(_) => {
                                        warn!(
                                            "connection from {} rejected: max connections ({}) reached",
                                            addr,
                                            self.config.server.max_connections
                                        );
                                        self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                        drop(stream);
                                        continue;
                                    }
                                }
                            } else {
                                None
                            };

                            debug!("accepted connection from {}", addr);
                            self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let config = Arc::clone(&self.config);
                            let selector = Arc::clone(&self.selector);
                            let issuer = Arc::clone(&self.issuer);
                            let stats = Arc::clone(&self.stats);
                            let shutdown_rx = self.shutdown_rx.resubscribe();

                            tokio::spawn(async move {
                                // Hold permit for the connection lifetime
                                let _permit = permit;

                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    addr,
                                    config,
                                    selector,
                                    issuer,
                                    shutdown_rx,
                                ).await {
                                    warn!("connection from {} error: {}", addr, e);
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                debug!("connection from {} closed", addr);
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                            // Brief delay before retrying
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "listener stopped. total: {}, active: {}, rejected: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed),
            self.stats.connections_rejected.load(Ordering::Relaxed)
        );

        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: std::net::SocketAddr,
        config: Arc<ProxyConfig>,
        selector: Arc<dyn BackendSelector>,
        issuer: Arc<dyn TokenIssuer>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let connection =
            ClientConnection::new(stream, addr, config, selector, issuer, shutdown_rx)?;
        connection.run().await
    }
}
