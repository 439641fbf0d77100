//! Per-session connection orchestration
//!
//! One `ClientConnection` owns the client-side and backend-side packet
//! channels of a logical session. It drives the authenticator, then
//! forwards commands until either side closes, inspecting just enough of
//! each command and response to keep the shadow state current and to know
//! when a response is complete. At any command boundary the session can
//! be re-bound to a freshly selected backend without the client noticing.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{Authenticator, BackendSelector, BackendTarget, SessionState, TokenIssuer};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::net::PacketIo;
use crate::protocol::mysql::*;

/// Requests a backend re-bind for a running session.
///
/// Handed out by [`ClientConnection::redirect_handle`]; cheap to clone.
/// A request takes effect at the session's next command boundary. With
/// `None` as target the connection asks its selector for a fresh
/// address.
#[derive(Clone)]
pub struct RedirectHandle {
    pending: Arc<Mutex<Option<Option<BackendTarget>>>>,
    notify: Arc<Notify>,
}

impl RedirectHandle {
    fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request a re-bind to `target`, or to a selector-chosen backend
    /// when `target` is `None`. Overwrites any earlier pending request.
    /// An idle session re-binds immediately; a busy one at its next
    /// command boundary.
    pub fn request(&self, target: Option<BackendTarget>) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(target);
        }
        self.notify.notify_one();
    }

    /// Whether a request is waiting for the next command boundary.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    fn take(&self) -> Option<Option<BackendTarget>> {
        self.pending.lock().ok().and_then(|mut p| p.take())
    }
}

/// Orchestrates one client session from accept to teardown.
pub struct ClientConnection {
    id: Uuid,
    client: PacketIo,
    client_addr: SocketAddr,
    config: Arc<ProxyConfig>,
    selector: Arc<dyn BackendSelector>,
    issuer: Arc<dyn TokenIssuer>,
    authenticator: Authenticator,
    redirect: RedirectHandle,
    cancel: CancellationToken,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ClientConnection {
    /// Wrap an accepted client stream.
    ///
    /// # Errors
    ///
    /// Returns an error if frontend TLS is enabled but the acceptor
    /// cannot be built (e.g. certificate file missing).
    pub fn new(
        stream: TcpStream,
        client_addr: SocketAddr,
        config: Arc<ProxyConfig>,
        selector: Arc<dyn BackendSelector>,
        issuer: Arc<dyn TokenIssuer>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let authenticator = Authenticator::new(&config.server.tls)?;
        let cancel = CancellationToken::new();
        let mut client = PacketIo::new(stream).with_cancellation(cancel.clone());
        if config.server.proxy_protocol {
            client.enable_proxy_protocol();
        }
        Ok(Self {
            id: Uuid::new_v4(),
            client,
            client_addr,
            config,
            selector,
            issuer,
            authenticator,
            redirect: RedirectHandle::new(),
            cancel,
            shutdown_rx,
        })
    }

    /// Session id used in log output.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A handle for requesting backend re-binds.
    pub fn redirect_handle(&self) -> RedirectHandle {
        self.redirect.clone()
    }

    /// A token that hard-closes the session when cancelled: pending reads
    /// on both sides return immediately. Graceful shutdown goes through
    /// the broadcast channel instead and completes the current command
    /// cycle first.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full session lifecycle. Returns when either side closes,
    /// on fatal error, or on shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.client.set_keepalive(&self.config.keepalive)?;

        // Hard-close watchdog: once a shutdown signal arrives, the
        // session gets the drain window to reach a boundary, then both
        // sides are cut.
        let drain = self.config.drain_timeout();
        let cancel = self.cancel.clone();
        let mut watchdog_rx = self.shutdown_rx.resubscribe();
        let watchdog = tokio::spawn(async move {
            let _ = watchdog_rx.recv().await;
            tokio::time::sleep(drain).await;
            cancel.cancel();
        });

        let result = self.serve().await;

        watchdog.abort();
        if let Err(e) = self.client.close().await {
            debug!(session = %self.id, "closing client connection: {}", e);
        }
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let target = self.selector.next(None).await?;
        let mut backend = self.connect_backend(&target).await?;

        let backend_tls = target.tls.as_ref().map(|t| (t, target.host.as_str()));
        let mut session = match self
            .authenticator
            .authenticate_first_time(
                &mut self.client,
                &mut backend,
                backend_tls,
                self.issuer.as_ref(),
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let _ = backend.close().await;
                return Err(e);
            }
        };

        let client_addr = self.client.proxy_peer_addr().unwrap_or(self.client_addr);
        info!(
            session = %self.id,
            client = %client_addr,
            backend = %target.addr(),
            user = %session.username,
            "session established"
        );

        let result = self.forward_commands(&mut backend, &mut session).await;
        let _ = backend.close().await;
        result
    }

    /// The command-phase forwarding loop.
    async fn forward_commands(
        &mut self,
        backend: &mut PacketIo,
        session: &mut SessionState,
    ) -> Result<()> {
        loop {
            // Command boundary: both sides quiescent, counters resynced.
            self.client.reset_sequence();
            backend.reset_sequence();

            if let Some(requested) = self.redirect.take() {
                self.redirect_backend(backend, session, requested).await?;
                continue;
            }

            // Park on a non-consuming readiness probe so that redirect
            // and shutdown can win the race without tearing a
            // half-received packet. Once bytes are in flight the command
            // is read to completion.
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    debug!(session = %self.id, "shutdown at command boundary");
                    return Ok(());
                }
                _ = self.redirect.notify.notified() => continue,
                result = self.client.readable() => result?,
            };
            let payload = match self.client.read_packet().await {
                Ok(payload) => payload,
                Err(ProxyError::ReadConn(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    // client went away between commands
                    debug!(session = %self.id, "client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let Some(&cmd) = payload.first() else {
                return Err(ProxyError::Protocol("empty command packet".into()));
            };

            match cmd {
                COM_QUIT => {
                    backend.write_packet(&payload, true).await?;
                    debug!(session = %self.id, "client quit");
                    return Ok(());
                }
                COM_INIT_DB => {
                    backend.write_packet(&payload, true).await?;
                    // single OK or ERR; the shadow database is committed
                    // only once the backend accepts the switch
                    let reply = backend.read_packet().await?;
                    self.client.write_packet(&reply, true).await?;
                    if is_ok_packet(&reply) {
                        let database = String::from_utf8_lossy(&payload[1..]).to_string();
                        session.database = if database.is_empty() {
                            None
                        } else {
                            Some(database)
                        };
                    }
                }
                COM_CHANGE_USER => {
                    if self.redirect.is_pending() {
                        // Refused until the migration runs at this
                        // boundary; the client may retry afterwards.
                        let err = ErrPacket::new(
                            ER_PROXY_REDIRECT_PENDING,
                            "cannot change user while a session migration is pending",
                        );
                        self.client
                            .write_packet(&build_err_packet(&err, session.capabilities), true)
                            .await?;
                    } else {
                        self.authenticator
                            .change_user(&mut self.client, backend, session, &payload)
                            .await?;
                    }
                }
                COM_STATISTICS => {
                    backend.write_packet(&payload, true).await?;
                    let stats = backend.read_packet().await?;
                    self.client.write_packet(&stats, true).await?;
                }
                COM_FIELD_LIST | COM_STMT_FETCH => {
                    backend.write_packet(&payload, true).await?;
                    self.forward_until_terminator(backend, session).await?;
                }
                COM_STMT_PREPARE => {
                    backend.write_packet(&payload, true).await?;
                    self.forward_prepare_response(backend, session).await?;
                }
                cmd if command_expects_no_response(cmd) => {
                    backend.write_packet(&payload, true).await?;
                }
                _ => {
                    backend.write_packet(&payload, true).await?;
                    self.forward_response(backend, session).await?;
                }
            }
        }
    }

    /// Forward one complete backend response of any shape, repeating for
    /// multi-resultsets.
    async fn forward_response(
        &mut self,
        backend: &mut PacketIo,
        session: &SessionState,
    ) -> Result<()> {
        let deprecate_eof = session.capabilities & CLIENT_DEPRECATE_EOF != 0;
        loop {
            let payload = backend.read_packet().await?;
            let status = match payload.first().copied() {
                Some(OK_HEADER) => {
                    let status =
                        response_status_flags(&payload, deprecate_eof, session.capabilities);
                    self.client.write_packet(&payload, true).await?;
                    status
                }
                Some(ERR_HEADER) => {
                    self.client.write_packet(&payload, true).await?;
                    return Ok(());
                }
                Some(EOF_HEADER) if is_result_set_terminator(&payload, deprecate_eof) => {
                    // single-packet EOF-shaped response (COM_SET_OPTION
                    // and friends)
                    let status =
                        response_status_flags(&payload, deprecate_eof, session.capabilities);
                    self.client.write_packet(&payload, true).await?;
                    status
                }
                Some(LOCAL_INFILE_HEADER) => {
                    self.forward_local_infile(backend, session, &payload)
                        .await?
                }
                Some(_) => self.forward_result_set(backend, session, payload).await?,
                None => return Err(ProxyError::Protocol("empty response packet".into())),
            };

            if status & SERVER_MORE_RESULTS_EXISTS == 0 {
                return Ok(());
            }
            trace!(session = %self.id, "more results follow");
        }
    }

    /// Forward a result set: column count, definitions, optional EOF,
    /// rows, terminator. Returns the terminator's status flags.
    async fn forward_result_set(
        &mut self,
        backend: &mut PacketIo,
        session: &SessionState,
        first: Vec<u8>,
    ) -> Result<u16> {
        let deprecate_eof = session.capabilities & CLIENT_DEPRECATE_EOF != 0;
        let columns = column_count(&first)?;
        self.client.write_packet(&first, false).await?;

        for _ in 0..columns {
            let definition = backend.read_packet().await?;
            self.client.write_packet(&definition, false).await?;
        }
        if !deprecate_eof {
            let eof = backend.read_packet().await?;
            self.client.write_packet(&eof, false).await?;
        }

        loop {
            let row = backend.read_packet().await?;
            if is_err_packet(&row) {
                self.client.write_packet(&row, true).await?;
                return Ok(0);
            }
            if is_result_set_terminator(&row, deprecate_eof) {
                let status = response_status_flags(&row, deprecate_eof, session.capabilities);
                self.client.write_packet(&row, true).await?;
                return Ok(status);
            }
            self.client.write_packet(&row, false).await?;
        }
    }

    /// The LOCAL INFILE sub-dialog: the request goes to the client, which
    /// streams data packets to the backend until an empty packet, then
    /// the backend's terminator flows back. Returns its status flags.
    async fn forward_local_infile(
        &mut self,
        backend: &mut PacketIo,
        session: &SessionState,
        request: &[u8],
    ) -> Result<u16> {
        let deprecate_eof = session.capabilities & CLIENT_DEPRECATE_EOF != 0;
        self.client.write_packet(request, true).await?;

        loop {
            let chunk = self.client.read_packet().await?;
            let done = chunk.is_empty();
            backend.write_packet(&chunk, done).await?;
            if done {
                break;
            }
        }

        let terminator = backend.read_packet().await?;
        let status = response_status_flags(&terminator, deprecate_eof, session.capabilities);
        self.client.write_packet(&terminator, true).await?;
        Ok(status)
    }

    /// Forward packets until an EOF/OK terminator or ERR arrives. Used
    /// for COM_FIELD_LIST (definitions) and COM_STMT_FETCH (rows).
    async fn forward_until_terminator(
        &mut self,
        backend: &mut PacketIo,
        session: &SessionState,
    ) -> Result<()> {
        let deprecate_eof = session.capabilities & CLIENT_DEPRECATE_EOF != 0;
        loop {
            let payload = backend.read_packet().await?;
            if is_err_packet(&payload) || is_result_set_terminator(&payload, deprecate_eof) {
                self.client.write_packet(&payload, true).await?;
                return Ok(());
            }
            self.client.write_packet(&payload, false).await?;
        }
    }

    /// Forward a COM_STMT_PREPARE response: the prepare-OK header
    /// announces how many parameter and column definitions follow.
    async fn forward_prepare_response(
        &mut self,
        backend: &mut PacketIo,
        session: &SessionState,
    ) -> Result<()> {
        let deprecate_eof = session.capabilities & CLIENT_DEPRECATE_EOF != 0;
        let first = backend.read_packet().await?;
        if is_err_packet(&first) {
            self.client.write_packet(&first, true).await?;
            return Ok(());
        }
        if first.first() != Some(&OK_HEADER) || first.len() < 12 {
            return Err(ProxyError::Protocol("malformed prepare response".into()));
        }
        let num_columns = u16::from_le_bytes([first[5], first[6]]) as usize;
        let num_params = u16::from_le_bytes([first[7], first[8]]) as usize;
        self.client.write_packet(&first, false).await?;

        for block in [num_params, num_columns] {
            if block == 0 {
                continue;
            }
            for _ in 0..block {
                let definition = backend.read_packet().await?;
                self.client.write_packet(&definition, false).await?;
            }
            if !deprecate_eof {
                let eof = backend.read_packet().await?;
                self.client.write_packet(&eof, false).await?;
            }
        }
        self.client.flush().await
    }

    /// Re-bind the session to a new backend at a command boundary.
    ///
    /// Mints a fresh token, tears the old backend down, then dials and
    /// token-authenticates fresh targets until one accepts or the retry
    /// budget is spent. On exhaustion the client gets a synthesized ERR
    /// and the session ends.
    async fn redirect_backend(
        &mut self,
        backend: &mut PacketIo,
        session: &mut SessionState,
        mut requested: Option<BackendTarget>,
    ) -> Result<()> {
        info!(session = %self.id, user = %session.username, "re-binding session to a new backend");

        // liveness hint only, but no point migrating a dead session
        if !self.client.is_peer_active().await {
            return Err(ProxyError::Connection(
                "client disconnected before migration".into(),
            ));
        }

        let token = self.issuer.mint(session).await?;
        session.set_token(token)?;

        if let Err(e) = backend.close().await {
            debug!(session = %self.id, "closing old backend: {}", e);
        }

        let mut last_error: Option<ProxyError> = None;
        for attempt in 0..self.config.backend.max_redirect_retries {
            let target = match requested.take() {
                Some(target) => target,
                None => match self.selector.next(Some(session)).await {
                    Ok(target) => target,
                    Err(e) => {
                        last_error = Some(e);
                        break;
                    }
                },
            };

            match self.connect_and_authenticate(&target, session).await {
                Ok(new_backend) => {
                    info!(session = %self.id, backend = %target.addr(), "session re-bound");
                    *backend = new_backend;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        session = %self.id,
                        backend = %target.addr(),
                        attempt,
                        "redirect attempt failed: {}", e
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = ErrPacket::new(
            ER_PROXY_NO_BACKEND,
            "no backend available for session migration",
        );
        self.client
            .write_packet(&build_err_packet(&err, session.capabilities), true)
            .await?;
        Err(ProxyError::RedirectFailed(match last_error {
            Some(e) => e.to_string(),
            None => "no backend available".to_string(),
        }))
    }

    async fn connect_and_authenticate(
        &self,
        target: &BackendTarget,
        session: &SessionState,
    ) -> Result<PacketIo> {
        let mut backend = self.connect_backend(target).await?;
        let backend_tls = target.tls.as_ref().map(|t| (t, target.host.as_str()));
        match self
            .authenticator
            .authenticate_second_time(&mut backend, session, self.issuer.as_ref(), backend_tls)
            .await
        {
            Ok(()) => Ok(backend),
            Err(e) => {
                let _ = backend.close().await;
                Err(e)
            }
        }
    }

    async fn connect_backend(&self, target: &BackendTarget) -> Result<PacketIo> {
        let addr = target.addr();
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout(format!("connecting to backend {}", addr)))?
            .map_err(|e| {
                ProxyError::Connection(format!("failed to connect to backend {}: {}", addr, e))
            })?;

        let mut backend = PacketIo::new(stream).with_cancellation(self.cancel.clone());
        backend.set_keepalive(&self.config.keepalive)?;
        debug!(session = %self.id, backend = %addr, "backend connected");
        Ok(backend)
    }
}
