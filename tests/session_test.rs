//! End-to-end session tests
//!
//! A mock MySQL client and a mock MySQL backend talk through the proxy
//! over loopback TCP. Both mocks act like real endpoints: they parse
//! packets and respond, so the tests can check that the data received on
//! one side equals the data sent from the other, that the auth dialog is
//! bridged correctly, and that the per-side sequence counters stay in
//! lockstep after every command/response cycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use roamdb_proxy::protocol::mysql::*;
use roamdb_proxy::{
    BackendSelector, BackendTarget, ClientConnection, Listener, PacketIo, ProxyConfig, ProxyError,
    RedirectHandle, Result, SessionState, TokenIssuer, SUPPORTED_CAPABILITIES,
};

const BACKEND_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_FOUND_ROWS
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_LOCAL_FILES
    | CLIENT_CONNECT_ATTRS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_INTERACTIVE
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | CLIENT_DEPRECATE_EOF;

const CLIENT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_RESULTS
    | CLIENT_LOCAL_FILES
    | CLIENT_CONNECT_ATTRS
    | CLIENT_PLUGIN_AUTH;

const MOCK_SALT: [u8; 20] = *b"01234567890123456789";

// ============================================================================
// Collaborator stubs
// ============================================================================

struct MockIssuer {
    token: Vec<u8>,
}

#[async_trait]
impl TokenIssuer for MockIssuer {
    async fn mint(&self, _session: &SessionState) -> Result<Vec<u8>> {
        Ok(self.token.clone())
    }

    fn plugin_name(&self) -> &str {
        "mock_session_token"
    }
}

fn default_issuer() -> Arc<MockIssuer> {
    Arc::new(MockIssuer {
        token: vec![0x74; 512],
    })
}

/// Hands out targets in order; sticks to the last one once exhausted.
struct QueueSelector {
    targets: Vec<BackendTarget>,
    cursor: AtomicUsize,
}

#[async_trait]
impl BackendSelector for QueueSelector {
    async fn next(&self, _session: Option<&SessionState>) -> Result<BackendTarget> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(self.targets[index.min(self.targets.len() - 1)].clone())
    }
}

fn selector_for(addrs: &[SocketAddr]) -> Arc<QueueSelector> {
    Arc::new(QueueSelector {
        targets: addrs
            .iter()
            .map(|a| BackendTarget::new(a.ip().to_string(), a.port()))
            .collect(),
        cursor: AtomicUsize::new(0),
    })
}

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Clone)]
struct BackendOpts {
    plugin: &'static str,
    switch_plugin: Option<&'static str>,
    auth_ok: bool,
}

impl Default for BackendOpts {
    fn default() -> Self {
        Self {
            plugin: "mysql_native_password",
            switch_plugin: None,
            auth_ok: true,
        }
    }
}

/// What one backend connection observed over its lifetime.
#[derive(Default)]
struct BackendSession {
    username: String,
    database: Option<String>,
    auth_response: Vec<u8>,
    plugin: Option<String>,
    capabilities: u32,
    attrs: Option<Vec<(String, String)>>,
    auth_succeeded: bool,
    selected_db: Option<String>,
    changed_user: Option<String>,
    infile_bytes: Vec<u8>,
    long_data_packets: usize,
    queries: Vec<String>,
    got_quit: bool,
    seq_after: Vec<u8>,
}

async fn start_backend(opts: BackendOpts) -> (SocketAddr, JoinHandle<Result<BackendSession>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.map_err(ProxyError::Io)?;
        let mut io = PacketIo::new(stream);
        let mut session = backend_handshake(&mut io, &opts).await?;
        if session.auth_succeeded {
            backend_serve(&mut io, &mut session).await?;
        }
        Ok(session)
    });
    (addr, handle)
}

async fn backend_handshake(io: &mut PacketIo, opts: &BackendOpts) -> Result<BackendSession> {
    let mut greeting = HandshakeV10 {
        server_version: "8.0.33".to_string(),
        connection_id: 42,
        auth_plugin_name: opts.plugin.to_string(),
        ..Default::default()
    };
    greeting.auth_plugin_data_part_1.copy_from_slice(&MOCK_SALT[..8]);
    greeting.auth_plugin_data_part_2 = MOCK_SALT[8..].to_vec();
    greeting.set_capability_flags(BACKEND_CAPABILITIES);
    io.write_packet(&build_handshake_v10(&greeting), true).await?;

    let response = parse_handshake_response41(&io.read_packet().await?)?;
    let mut session = BackendSession {
        username: response.username.clone(),
        database: response.database.clone(),
        auth_response: response.auth_response.clone(),
        plugin: response.auth_plugin_name.clone(),
        capabilities: response.capability_flags,
        attrs: response.connect_attrs.clone(),
        ..Default::default()
    };

    if let Some(plugin) = opts.switch_plugin {
        let switch = AuthSwitchRequest {
            plugin_name: plugin.to_string(),
            plugin_data: MOCK_SALT.to_vec(),
        };
        io.write_packet(&build_auth_switch_request(&switch), true)
            .await?;
        session.auth_response = io.read_packet().await?;
        session.plugin = Some(plugin.to_string());
    }

    if opts.auth_ok {
        write_ok(io, session.capabilities, 0).await?;
        session.auth_succeeded = true;
    } else {
        let err = ErrPacket::new(1045, "Access denied for user");
        io.write_packet(&build_err_packet(&err, session.capabilities), true)
            .await?;
    }
    Ok(session)
}

async fn backend_serve(io: &mut PacketIo, session: &mut BackendSession) -> Result<()> {
    let caps = session.capabilities;
    loop {
        io.reset_sequence();
        let command = match io.read_packet().await {
            Ok(packet) => packet,
            // peer closed, e.g. after a re-bind
            Err(_) => break,
        };
        if command.is_empty() {
            break;
        }
        match command[0] {
            COM_QUIT => {
                session.got_quit = true;
                break;
            }
            COM_INIT_DB => {
                let database = String::from_utf8_lossy(&command[1..]).to_string();
                if database == "missing" {
                    let err = ErrPacket::new(1049, "Unknown database 'missing'");
                    io.write_packet(&build_err_packet(&err, caps), true).await?;
                } else {
                    session.selected_db = Some(database);
                    write_ok(io, caps, 0).await?;
                }
            }
            COM_CHANGE_USER => {
                let change = parse_change_user(&command, caps)?;
                session.changed_user = Some(change.username);
                write_ok(io, caps, 0).await?;
            }
            COM_STMT_SEND_LONG_DATA => {
                session.long_data_packets += 1;
            }
            COM_STMT_PREPARE => {
                send_prepare_response(io, caps, 2, 1).await?;
            }
            COM_QUERY => {
                let sql = String::from_utf8_lossy(&command[1..]).to_string();
                session.queries.push(sql.clone());
                if sql.starts_with("LOAD DATA LOCAL INFILE") {
                    let mut request = vec![LOCAL_INFILE_HEADER];
                    request.extend_from_slice(b"/etc/hosts");
                    io.write_packet(&request, true).await?;
                    loop {
                        let chunk = io.read_packet().await?;
                        if chunk.is_empty() {
                            break;
                        }
                        session.infile_bytes.extend_from_slice(&chunk);
                    }
                    write_ok(io, caps, 0).await?;
                } else if sql == "SELECT MULTI" {
                    send_result_set(io, caps, 2, 3, true).await?;
                    send_result_set(io, caps, 1, 1, false).await?;
                } else if sql.starts_with("SELECT") {
                    send_result_set(io, caps, 2, 3, false).await?;
                } else if sql.starts_with("BAD") {
                    let err = ErrPacket::new(1064, "You have an error in your SQL syntax");
                    io.write_packet(&build_err_packet(&err, caps), true).await?;
                } else {
                    write_ok(io, caps, 0).await?;
                }
            }
            _ => {
                write_ok(io, caps, 0).await?;
            }
        }
        session.seq_after.push(io.sequence());
    }
    Ok(())
}

async fn write_ok(io: &mut PacketIo, caps: u32, status: u16) -> Result<()> {
    let ok = OkPacket {
        status_flags: SERVER_STATUS_AUTOCOMMIT | status,
        ..Default::default()
    };
    io.write_packet(&build_ok_packet(&ok, caps), true).await
}

fn eof_payload(status: u16) -> Vec<u8> {
    let mut payload = vec![EOF_HEADER, 0, 0];
    payload.extend_from_slice(&status.to_le_bytes());
    payload
}

async fn send_result_set(
    io: &mut PacketIo,
    caps: u32,
    columns: u64,
    rows: u64,
    more_results: bool,
) -> Result<()> {
    let deprecate_eof = caps & CLIENT_DEPRECATE_EOF != 0;
    let mut count = Vec::new();
    write_length_encoded_int(&mut count, columns);
    io.write_packet(&count, false).await?;

    for i in 0..columns {
        io.write_packet(format!("column-def-{}", i).as_bytes(), false)
            .await?;
    }
    if !deprecate_eof {
        io.write_packet(&eof_payload(0), false).await?;
    }
    for i in 0..rows {
        io.write_packet(format!("row-data-{}", i).as_bytes(), false)
            .await?;
    }

    let status =
        SERVER_STATUS_AUTOCOMMIT | if more_results { SERVER_MORE_RESULTS_EXISTS } else { 0 };
    if deprecate_eof {
        let ok = OkPacket {
            header: EOF_HEADER,
            status_flags: status,
            ..Default::default()
        };
        io.write_packet(&build_ok_packet(&ok, caps), true).await?;
    } else {
        io.write_packet(&eof_payload(status), true).await?;
    }
    Ok(())
}

async fn send_prepare_response(
    io: &mut PacketIo,
    caps: u32,
    params: u16,
    columns: u16,
) -> Result<()> {
    let deprecate_eof = caps & CLIENT_DEPRECATE_EOF != 0;
    let mut head = vec![0x00];
    head.extend_from_slice(&7u32.to_le_bytes()); // statement id
    head.extend_from_slice(&columns.to_le_bytes());
    head.extend_from_slice(&params.to_le_bytes());
    head.push(0);
    head.extend_from_slice(&0u16.to_le_bytes()); // warnings
    io.write_packet(&head, false).await?;

    for i in 0..params {
        io.write_packet(format!("param-def-{}", i).as_bytes(), false)
            .await?;
    }
    if params > 0 && !deprecate_eof {
        io.write_packet(&eof_payload(0), false).await?;
    }
    for i in 0..columns {
        io.write_packet(format!("column-def-{}", i).as_bytes(), false)
            .await?;
    }
    if columns > 0 && !deprecate_eof {
        io.write_packet(&eof_payload(0), false).await?;
    }
    io.flush().await
}

// ============================================================================
// Mock client
// ============================================================================

struct ClientOpts {
    capabilities: u32,
    plugin: &'static str,
    username: &'static str,
    database: Option<&'static str>,
    auth_data: Vec<u8>,
    attrs: Vec<(String, String)>,
}

impl Default for ClientOpts {
    fn default() -> Self {
        Self {
            capabilities: CLIENT_CAPABILITIES,
            plugin: "mysql_native_password",
            username: "test_user",
            database: Some("test_db"),
            auth_data: b"native-signature-123".to_vec(),
            attrs: vec![("program_name".to_string(), "mysql".to_string())],
        }
    }
}

struct ClientAuth {
    advertised: u32,
    chosen: u32,
    switched_plugin: Option<String>,
    switch_salt: Option<Vec<u8>>,
    auth_ok: bool,
    err_code: Option<u16>,
}

async fn client_connect(addr: SocketAddr, opts: &ClientOpts) -> Result<(PacketIo, ClientAuth)> {
    let stream = TcpStream::connect(addr).await.map_err(ProxyError::Io)?;
    let mut io = PacketIo::new(stream);

    let greeting = parse_handshake_v10(&io.read_packet().await?)?;
    let advertised = greeting.capability_flags();
    let chosen = opts.capabilities & advertised;

    let response = HandshakeResponse41 {
        capability_flags: chosen,
        username: opts.username.to_string(),
        auth_response: opts.auth_data.clone(),
        database: opts.database.map(|d| d.to_string()),
        auth_plugin_name: Some(opts.plugin.to_string()),
        connect_attrs: if opts.attrs.is_empty() {
            None
        } else {
            Some(opts.attrs.clone())
        },
        ..Default::default()
    };
    io.write_packet(&build_handshake_response41(&response), true)
        .await?;

    let mut auth = ClientAuth {
        advertised,
        chosen,
        switched_plugin: None,
        switch_salt: None,
        auth_ok: false,
        err_code: None,
    };
    loop {
        let packet = io.read_packet().await?;
        match packet.first().copied() {
            Some(OK_HEADER) => {
                auth.auth_ok = true;
                return Ok((io, auth));
            }
            Some(ERR_HEADER) => {
                let err = parse_err_packet(&packet, chosen)?;
                auth.err_code = Some(err.error_code);
                return Ok((io, auth));
            }
            Some(EOF_HEADER) => {
                let switch = parse_auth_switch_request(&packet)?;
                auth.switch_salt = Some(switch.plugin_data.clone());
                // deterministic stand-in for a re-signed auth response
                let mut signature = switch.plugin_name.clone().into_bytes();
                signature.extend_from_slice(&switch.plugin_data);
                auth.switched_plugin = Some(switch.plugin_name);
                io.write_packet(&signature, true).await?;
            }
            other => {
                return Err(ProxyError::Protocol(format!(
                    "unexpected packet during client auth: {:?}",
                    other
                )))
            }
        }
    }
}

async fn send_command(io: &mut PacketIo, cmd: u8, body: &[u8]) -> Result<()> {
    io.reset_sequence();
    let mut payload = vec![cmd];
    payload.extend_from_slice(body);
    io.write_packet(&payload, true).await
}

/// Read one complete response of any shape (handles multi-resultsets).
async fn read_full_response(io: &mut PacketIo, caps: u32) -> Result<Vec<Vec<u8>>> {
    let deprecate_eof = caps & CLIENT_DEPRECATE_EOF != 0;
    let mut packets = Vec::new();
    loop {
        let first = io.read_packet().await?;
        let mut status = 0u16;
        match first.first().copied() {
            Some(OK_HEADER) => {
                status = response_status_flags(&first, deprecate_eof, caps);
                packets.push(first);
            }
            Some(ERR_HEADER) => {
                packets.push(first);
                return Ok(packets);
            }
            Some(EOF_HEADER) if is_result_set_terminator(&first, deprecate_eof) => {
                status = response_status_flags(&first, deprecate_eof, caps);
                packets.push(first);
            }
            Some(_) => {
                let columns = column_count(&first)?;
                packets.push(first);
                for _ in 0..columns {
                    packets.push(io.read_packet().await?);
                }
                if !deprecate_eof {
                    packets.push(io.read_packet().await?);
                }
                loop {
                    let row = io.read_packet().await?;
                    if is_err_packet(&row) {
                        packets.push(row);
                        return Ok(packets);
                    }
                    if is_result_set_terminator(&row, deprecate_eof) {
                        status = response_status_flags(&row, deprecate_eof, caps);
                        packets.push(row);
                        break;
                    }
                    packets.push(row);
                }
            }
            None => return Err(ProxyError::Protocol("empty response".into())),
        }
        if status & SERVER_MORE_RESULTS_EXISTS == 0 {
            return Ok(packets);
        }
    }
}

/// Read a COM_STMT_PREPARE response.
async fn read_prepare_response(io: &mut PacketIo, caps: u32) -> Result<Vec<Vec<u8>>> {
    let deprecate_eof = caps & CLIENT_DEPRECATE_EOF != 0;
    let first = io.read_packet().await?;
    if is_err_packet(&first) {
        return Ok(vec![first]);
    }
    let columns = u16::from_le_bytes([first[5], first[6]]);
    let params = u16::from_le_bytes([first[7], first[8]]);
    let mut packets = vec![first];
    for block in [params, columns] {
        if block == 0 {
            continue;
        }
        for _ in 0..block {
            packets.push(io.read_packet().await?);
        }
        if !deprecate_eof {
            packets.push(io.read_packet().await?);
        }
    }
    Ok(packets)
}

// ============================================================================
// Proxy harnesses
// ============================================================================

async fn start_listener_proxy(
    selector: Arc<dyn BackendSelector>,
    issuer: Arc<dyn TokenIssuer>,
) -> (SocketAddr, broadcast::Sender<()>) {
    let config = Arc::new(ProxyConfig::default());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let listener = Listener::bind(config, selector, issuer, shutdown_rx)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    (addr, shutdown_tx)
}

/// A proxy serving a single session, with its redirect handle exposed.
async fn start_session_proxy(
    config: Arc<ProxyConfig>,
    selector: Arc<dyn BackendSelector>,
    issuer: Arc<dyn TokenIssuer>,
) -> (
    SocketAddr,
    oneshot::Receiver<RedirectHandle>,
    broadcast::Sender<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handle_tx, handle_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Ok((stream, peer)) = listener.accept().await {
            if let Ok(connection) =
                ClientConnection::new(stream, peer, config, selector, issuer, shutdown_rx)
            {
                let _ = handle_tx.send(connection.redirect_handle());
                let _ = connection.run().await;
            }
        }
    });
    (addr, handle_rx, shutdown_tx)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_first_time_auth_bridges_identity() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let opts = ClientOpts::default();
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert!(auth.auth_ok);
    assert!(auth.switched_plugin.is_none());
    // the client observes exactly the proxied intersection of
    // capabilities; compression in particular is never forwarded
    assert_eq!(auth.advertised, BACKEND_CAPABILITIES & SUPPORTED_CAPABILITIES);
    assert_eq!(auth.advertised & CLIENT_COMPRESS, 0);

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert!(session.auth_succeeded);
    assert!(session.got_quit);
    assert_eq!(session.username, "test_user");
    assert_eq!(session.database.as_deref(), Some("test_db"));
    assert_eq!(session.auth_response, opts.auth_data);
    assert_eq!(session.attrs, Some(opts.attrs.clone()));
}

#[tokio::test]
async fn test_first_time_auth_with_plugin_switch() {
    let (backend_addr, backend) = start_backend(BackendOpts {
        plugin: "caching_sha2_password",
        ..Default::default()
    })
    .await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    // the client only signs with mysql_native_password
    let opts = ClientOpts::default();
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert!(auth.auth_ok);
    assert_eq!(auth.switched_plugin.as_deref(), Some("caching_sha2_password"));
    assert_eq!(auth.switch_salt.as_deref(), Some(&MOCK_SALT[..]));

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.plugin.as_deref(), Some("caching_sha2_password"));
    // the re-signed response, not the original one, reaches the backend
    let mut expected = b"caching_sha2_password".to_vec();
    expected.extend_from_slice(&MOCK_SALT);
    assert_eq!(session.auth_response, expected);
}

#[tokio::test]
async fn test_backend_driven_plugin_switch_is_relayed() {
    let (backend_addr, backend) = start_backend(BackendOpts {
        switch_plugin: Some("caching_sha2_password"),
        ..Default::default()
    })
    .await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let opts = ClientOpts::default();
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert!(auth.auth_ok);
    assert_eq!(auth.switched_plugin.as_deref(), Some("caching_sha2_password"));

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    let mut expected = b"caching_sha2_password".to_vec();
    expected.extend_from_slice(&MOCK_SALT);
    assert_eq!(session.auth_response, expected);
}

#[tokio::test]
async fn test_backend_rejects_authentication() {
    let (backend_addr, backend) = start_backend(BackendOpts {
        auth_ok: false,
        ..Default::default()
    })
    .await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let (_client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    // the backend ERR is forwarded verbatim
    assert!(!auth.auth_ok);
    assert_eq!(auth.err_code, Some(1045));

    let session = backend.await.unwrap().unwrap();
    assert!(!session.auth_succeeded);
}

#[tokio::test]
async fn test_forwarding_keeps_sequences_in_lockstep() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    assert!(auth.auth_ok);
    let caps = auth.chosen;
    let mut client_seqs = Vec::new();

    // ping: single OK
    send_command(&mut client, COM_PING, b"").await.unwrap();
    let packets = read_full_response(&mut client, caps).await.unwrap();
    assert_eq!(packets.len(), 1);
    client_seqs.push(client.sequence());

    // result set: count + 2 defs + EOF + 3 rows + EOF
    send_command(&mut client, COM_QUERY, b"SELECT * FROM t")
        .await
        .unwrap();
    let packets = read_full_response(&mut client, caps).await.unwrap();
    assert_eq!(packets.len(), 8);
    assert_eq!(&packets[1], b"column-def-0");
    assert_eq!(&packets[4], b"row-data-0");
    client_seqs.push(client.sequence());

    // backend error is forwarded as-is, session survives
    send_command(&mut client, COM_QUERY, b"BAD SYNTAX").await.unwrap();
    let packets = read_full_response(&mut client, caps).await.unwrap();
    assert_eq!(packets.len(), 1);
    let err = parse_err_packet(&packets[0], caps).unwrap();
    assert_eq!(err.error_code, 1064);
    client_seqs.push(client.sequence());

    // prepare: head + 2 param defs + EOF + 1 column def + EOF
    send_command(&mut client, COM_STMT_PREPARE, b"SELECT ?")
        .await
        .unwrap();
    let packets = read_prepare_response(&mut client, caps).await.unwrap();
    assert_eq!(packets.len(), 6);
    client_seqs.push(client.sequence());

    // long data: no response expected
    send_command(&mut client, COM_STMT_SEND_LONG_DATA, &[7, 0, 0, 0, 1, 2, 3])
        .await
        .unwrap();
    client_seqs.push(client.sequence());

    // database switch updates the shadow state and responds OK
    send_command(&mut client, COM_INIT_DB, b"inventory").await.unwrap();
    let packets = read_full_response(&mut client, caps).await.unwrap();
    assert_eq!(packets.len(), 1);
    client_seqs.push(client.sequence());

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.seq_after, client_seqs);
    assert_eq!(session.selected_db.as_deref(), Some("inventory"));
    assert_eq!(session.long_data_packets, 1);
    assert!(session.got_quit);
}

#[tokio::test]
async fn test_multi_result_set_forwarding() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();

    send_command(&mut client, COM_QUERY, b"SELECT MULTI").await.unwrap();
    let packets = read_full_response(&mut client, auth.chosen).await.unwrap();
    // (1 + 2 + 1 + 3 + 1) for the first set, (1 + 1 + 1 + 1 + 1) for the second
    assert_eq!(packets.len(), 13);
    let client_seq = client.sequence();

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.seq_after, vec![client_seq]);
}

#[tokio::test]
async fn test_deprecate_eof_result_set() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let opts = ClientOpts {
        capabilities: CLIENT_CAPABILITIES | CLIENT_DEPRECATE_EOF,
        ..Default::default()
    };
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert_ne!(auth.chosen & CLIENT_DEPRECATE_EOF, 0);

    send_command(&mut client, COM_QUERY, b"SELECT * FROM t")
        .await
        .unwrap();
    let packets = read_full_response(&mut client, auth.chosen).await.unwrap();
    // no EOF packets: count + 2 defs + 3 rows + OK terminator
    assert_eq!(packets.len(), 7);
    assert_eq!(packets[6][0], EOF_HEADER);
    let client_seq = client.sequence();

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.seq_after, vec![client_seq]);
}

#[tokio::test]
async fn test_local_infile_sub_dialog() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    assert!(auth.auth_ok);

    send_command(
        &mut client,
        COM_QUERY,
        b"LOAD DATA LOCAL INFILE '/etc/hosts' INTO TABLE hosts",
    )
    .await
    .unwrap();

    let request = client.read_packet().await.unwrap();
    assert_eq!(request[0], LOCAL_INFILE_HEADER);
    assert_eq!(&request[1..], b"/etc/hosts");

    let chunks: [&[u8]; 3] = [
        b"127.0.0.1 localhost\n",
        b"::1 localhost\n",
        b"192.0.2.1 example\n",
    ];
    for chunk in chunks {
        client.write_packet(chunk, true).await.unwrap();
    }
    client.write_packet(&[], true).await.unwrap();

    let terminator = client.read_packet().await.unwrap();
    assert!(is_ok_packet(&terminator));
    let client_seq = client.sequence();

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.infile_bytes, chunks.concat());
    assert_eq!(session.seq_after, vec![client_seq]);
    assert_eq!(client_seq, 7);
}

#[tokio::test]
async fn test_change_user_updates_shadow_state() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, _shutdown) =
        start_listener_proxy(selector_for(&[backend_addr]), default_issuer()).await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    assert!(auth.auth_ok);

    let mut body = Vec::new();
    body.extend_from_slice(b"bob\x00");
    body.push(4);
    body.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
    body.extend_from_slice(b"inventory\x00");
    body.extend_from_slice(&0x21u16.to_le_bytes());
    body.extend_from_slice(b"mysql_native_password\x00");
    send_command(&mut client, COM_CHANGE_USER, &body).await.unwrap();

    let reply = client.read_packet().await.unwrap();
    assert!(is_ok_packet(&reply));
    let client_seq = client.sequence();

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let session = backend.await.unwrap().unwrap();
    assert_eq!(session.changed_user.as_deref(), Some("bob"));
    assert_eq!(session.seq_after, vec![client_seq]);
}

#[tokio::test]
async fn test_session_reconnect_with_token() {
    let (first_addr, first_backend) = start_backend(BackendOpts::default()).await;
    let (second_addr, second_backend) = start_backend(BackendOpts::default()).await;
    let issuer = default_issuer();
    let selector = selector_for(&[first_addr, second_addr]);
    let config = Arc::new(ProxyConfig::default());
    let (proxy_addr, handle_rx, _shutdown) =
        start_session_proxy(config, selector, issuer).await;

    let opts = ClientOpts {
        username: "alice",
        database: Some("shop"),
        ..Default::default()
    };
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert!(auth.auth_ok);

    send_command(&mut client, COM_QUERY, b"SELECT 1").await.unwrap();
    read_full_response(&mut client, auth.chosen).await.unwrap();

    // re-bind while the client is idle; it sees no packets during the move
    let redirect = handle_rx.await.unwrap();
    redirect.request(None);

    let first = tokio::time::timeout(Duration::from_secs(5), first_backend)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.username, "alice");
    assert_eq!(first.queries, vec!["SELECT 1".to_string()]);
    assert!(!first.got_quit);

    // the next command runs against the new backend
    send_command(&mut client, COM_QUERY, b"SELECT 2").await.unwrap();
    read_full_response(&mut client, auth.chosen).await.unwrap();
    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    let second = second_backend.await.unwrap().unwrap();
    assert_eq!(second.username, "alice");
    assert_eq!(second.database.as_deref(), Some("shop"));
    assert_eq!(second.auth_response, vec![0x74; 512]);
    assert_eq!(second.plugin.as_deref(), Some("mock_session_token"));
    assert_eq!(second.attrs, first.attrs);
    assert_eq!(second.queries, vec!["SELECT 2".to_string()]);
    assert!(second.got_quit);
}

#[tokio::test]
async fn test_failed_init_db_does_not_poison_reconnect() {
    let (first_addr, first_backend) = start_backend(BackendOpts::default()).await;
    let (second_addr, second_backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, handle_rx, _shutdown) = start_session_proxy(
        Arc::new(ProxyConfig::default()),
        selector_for(&[first_addr, second_addr]),
        default_issuer(),
    )
    .await;

    let opts = ClientOpts {
        username: "alice",
        database: Some("shop"),
        ..Default::default()
    };
    let (mut client, auth) = client_connect(proxy_addr, &opts).await.unwrap();
    assert!(auth.auth_ok);

    // the backend refuses the switch, so the shadow state must keep the
    // database the session actually has
    send_command(&mut client, COM_INIT_DB, b"missing").await.unwrap();
    let reply = client.read_packet().await.unwrap();
    let err = parse_err_packet(&reply, auth.chosen).unwrap();
    assert_eq!(err.error_code, 1049);

    // an accepted switch is committed
    send_command(&mut client, COM_INIT_DB, b"inventory").await.unwrap();
    let reply = client.read_packet().await.unwrap();
    assert!(is_ok_packet(&reply));

    let redirect = handle_rx.await.unwrap();
    redirect.request(None);

    let first = tokio::time::timeout(Duration::from_secs(5), first_backend)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.selected_db.as_deref(), Some("inventory"));

    send_command(&mut client, COM_QUIT, b"").await.unwrap();

    // the replayed handshake carries the last accepted database, not the
    // rejected one
    let second = second_backend.await.unwrap().unwrap();
    assert_eq!(second.database.as_deref(), Some("inventory"));
    assert!(second.got_quit);
}

#[tokio::test]
async fn test_redirect_exhaustion_reports_error_to_client() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    // a port with nothing listening behind it
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let mut config = ProxyConfig::default();
    config.backend.max_redirect_retries = 2;
    let (proxy_addr, handle_rx, _shutdown) = start_session_proxy(
        Arc::new(config),
        selector_for(&[backend_addr, dead_addr]),
        default_issuer(),
    )
    .await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    assert!(auth.auth_ok);

    let redirect = handle_rx.await.unwrap();
    redirect.request(None);

    // the proxy synthesizes an ERR once the retry budget is spent
    client.reset_sequence();
    let packet = tokio::time::timeout(Duration::from_secs(5), client.read_packet())
        .await
        .unwrap()
        .unwrap();
    let err = parse_err_packet(&packet, auth.chosen).unwrap();
    assert_eq!(err.error_code, ER_PROXY_NO_BACKEND);

    let _ = backend.await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_session() {
    let (backend_addr, backend) = start_backend(BackendOpts::default()).await;
    let (proxy_addr, handle_rx, shutdown_tx) = start_session_proxy(
        Arc::new(ProxyConfig::default()),
        selector_for(&[backend_addr]),
        default_issuer(),
    )
    .await;

    let (mut client, auth) = client_connect(proxy_addr, &ClientOpts::default())
        .await
        .unwrap();
    assert!(auth.auth_ok);

    shutdown_tx.send(()).unwrap();

    // the proxy leaves at the command boundary and closes both sides
    let result = tokio::time::timeout(Duration::from_secs(5), client.read_packet()).await;
    assert!(result.unwrap().is_err());

    let _ = backend.await;
    let _ = handle_rx;
}
