//! MySQL handshake bridging
//!
//! The authenticator reads the backend's initial handshake, replays a
//! rewritten greeting to the client, bridges the two half-handshakes into
//! one negotiated session, and can later repeat the backend half alone
//! using a minted session token.

use crate::error::{ProxyError, Result};
use crate::net::PacketIo;
use crate::protocol::mysql::*;
use crate::tls::{TlsAcceptor, TlsConnector, TlsServerConfig};

use super::{SessionState, TokenIssuer};

/// Capabilities the proxy is willing to forward end-to-end.
///
/// Compression is deliberately absent: compressed framing would hide
/// packet boundaries from the forwarding loop. SSL is negotiated per side
/// and never forwarded as-is.
pub const SUPPORTED_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_LOCAL_FILES
    | CLIENT_PROTOCOL_41
    | CLIENT_INTERACTIVE
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_PS_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_CONNECT_ATTRS
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | CLIENT_SESSION_TRACK
    | CLIENT_DEPRECATE_EOF;

/// Conducts the MySQL handshake on both transport sides of a session.
pub struct Authenticator {
    proxy_capability: u32,
    frontend_tls: Option<TlsAcceptor>,
}

impl Authenticator {
    /// Create an authenticator with the given frontend TLS policy.
    ///
    /// When TLS is enabled the acceptor is built eagerly so certificate
    /// problems surface at connection setup, not mid-handshake.
    pub fn new(frontend: &TlsServerConfig) -> Result<Self> {
        let frontend_tls = if frontend.enabled {
            Some(TlsAcceptor::new(frontend)?)
        } else {
            None
        };
        Ok(Self {
            proxy_capability: SUPPORTED_CAPABILITIES,
            frontend_tls,
        })
    }

    /// Restrict the forwardable capability mask further (builder pattern).
    pub fn with_capabilities(mut self, capabilities: u32) -> Self {
        self.proxy_capability = capabilities;
        self
    }

    /// The mask advertised to clients: what the proxy forwards of the
    /// backend's capabilities, plus SSL when frontend TLS is on.
    fn client_advertised(&self, backend_caps: u32) -> u32 {
        let mut caps = backend_caps & self.proxy_capability;
        if self.frontend_tls.is_some() {
            caps |= CLIENT_SSL;
        } else {
            caps &= !CLIENT_SSL;
        }
        caps
    }

    /// The effective session mask: what the client chose, limited to what
    /// the backend advertised and the proxy forwards.
    fn effective(&self, client_chosen: u32, backend_caps: u32) -> u32 {
        client_chosen & backend_caps & self.proxy_capability
    }

    /// Bridge a first-time handshake between a client and a backend.
    ///
    /// Reads the backend greeting, forwards a capability-masked greeting
    /// to the client, upgrades either side to TLS as negotiated, performs
    /// an auth-plugin switch when the client's plugin differs from the
    /// backend's, relays any extra auth exchanges, and finally mints a
    /// session token through `issuer`.
    ///
    /// On success both connections sit at the start of the command phase
    /// and the returned [`SessionState`] holds everything needed to
    /// re-bind the session later.
    pub async fn authenticate_first_time(
        &self,
        client: &mut PacketIo,
        backend: &mut PacketIo,
        backend_tls: Option<(&TlsConnector, &str)>,
        issuer: &dyn TokenIssuer,
    ) -> Result<SessionState> {
        // Backend speaks first.
        let greeting_raw = backend.read_packet().await?;
        if is_err_packet(&greeting_raw) {
            client.write_packet(&greeting_raw, true).await?;
            let err = parse_err_packet(&greeting_raw, CLIENT_PROTOCOL_41)?;
            return Err(ProxyError::Handshake(format!(
                "backend refused connection: {} ({})",
                err.error_message, err.error_code
            )));
        }
        let mut greeting = parse_handshake_v10(&greeting_raw)?;
        let backend_caps = greeting.capability_flags();
        if backend_caps & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProxyError::Handshake(
                "backend does not support protocol 4.1".into(),
            ));
        }
        let backend_plugin = if greeting.auth_plugin_name.is_empty() {
            "mysql_native_password".to_string()
        } else {
            greeting.auth_plugin_name.clone()
        };

        // Forward a rewritten greeting: same version, salt, and plugin,
        // but only the capabilities the proxy is willing to carry.
        greeting.set_capability_flags(self.client_advertised(backend_caps));
        client
            .write_packet(&build_handshake_v10(&greeting), true)
            .await?;

        // Client answers, possibly with an SSL request first.
        let mut response_raw = client.read_packet().await?;
        if is_ssl_request(&response_raw) {
            let Some(acceptor) = self.frontend_tls.as_ref() else {
                let err = ErrPacket::new(1045, "SSL connections are not enabled on this proxy");
                client
                    .write_packet(&build_err_packet(&err, CLIENT_PROTOCOL_41), true)
                    .await?;
                return Err(ProxyError::Handshake(
                    "client requested TLS but frontend TLS is not enabled".into(),
                ));
            };
            client.upgrade_to_tls_server(acceptor).await?;
            debug!("client connection upgraded to TLS");
            response_raw = client.read_packet().await?;
        }

        let response = parse_handshake_response41(&response_raw)?;
        if response.capability_flags & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProxyError::Handshake(
                "client does not support protocol 4.1".into(),
            ));
        }
        let effective = self.effective(response.capability_flags, backend_caps);

        // If the client signed with a different plugin than the backend
        // expects, ask it to re-sign before anything reaches the backend.
        let client_plugin = response
            .auth_plugin_name
            .clone()
            .unwrap_or_else(|| "mysql_native_password".to_string());
        let mut auth_plugin = backend_plugin.clone();
        let mut auth_response = response.auth_response.clone();
        if client_plugin != backend_plugin {
            if response.capability_flags & CLIENT_PLUGIN_AUTH == 0 {
                return Err(ProxyError::AuthPluginUnsupported(backend_plugin));
            }
            debug!(
                "switching client from {} to {}",
                client_plugin, backend_plugin
            );
            let switch = AuthSwitchRequest {
                plugin_name: backend_plugin.clone(),
                plugin_data: greeting.get_scramble(),
            };
            client
                .write_packet(&build_auth_switch_request(&switch), true)
                .await?;
            auth_response = client.read_packet().await?;
        }

        // Forward the rewritten response, upgrading the backend side
        // first when its policy demands TLS.
        let mut forwarded = HandshakeResponse41 {
            capability_flags: effective,
            max_packet_size: response.max_packet_size,
            character_set: response.character_set,
            reserved: [0u8; 23],
            username: response.username.clone(),
            auth_response,
            database: response.database.clone(),
            auth_plugin_name: Some(auth_plugin.clone()),
            connect_attrs: response.connect_attrs.clone(),
        };
        if let Some((connector, host)) = backend_tls {
            forwarded.capability_flags |= CLIENT_SSL;
            backend
                .write_packet(
                    &build_ssl_request(
                        forwarded.capability_flags,
                        forwarded.max_packet_size,
                        forwarded.character_set,
                    ),
                    true,
                )
                .await?;
            backend.upgrade_to_tls_client(connector, host).await?;
            debug!("backend connection upgraded to TLS");
        }
        backend
            .write_packet(&build_handshake_response41(&forwarded), true)
            .await?;

        // Relay the rest of the dialog until the backend settles.
        let (outcome, switched) = relay_auth_outcome(client, backend).await?;
        if let Some(plugin) = switched {
            auth_plugin = plugin;
        }
        if is_err_packet(&outcome) {
            let message = parse_err_packet(&outcome, CLIENT_PROTOCOL_41)
                .map(|e| e.error_message)
                .unwrap_or_default();
            return Err(ProxyError::Handshake(format!(
                "backend rejected authentication: {}",
                message
            )));
        }

        let mut session = SessionState::new(
            response.username,
            response.database,
            response.character_set,
            response.connect_attrs.unwrap_or_default(),
            effective,
            auth_plugin,
        );
        let token = issuer.mint(&session).await?;
        session.set_token(token)?;

        debug!(
            user = %session.username,
            plugin = %session.auth_plugin,
            capabilities = format_args!("{:#010x}", session.capabilities),
            "session authenticated"
        );
        Ok(session)
    }

    /// Authenticate against a fresh backend using the session token.
    ///
    /// The client is not involved: the handshake response is synthesized
    /// from the shadow state, with the token as auth response and the
    /// issuer's plugin as plugin name. By contract with the issuer the
    /// backend must not request a plugin switch; if it does, the
    /// reconnect fails.
    pub async fn authenticate_second_time(
        &self,
        backend: &mut PacketIo,
        session: &SessionState,
        issuer: &dyn TokenIssuer,
        backend_tls: Option<(&TlsConnector, &str)>,
    ) -> Result<()> {
        let greeting_raw = backend.read_packet().await?;
        if is_err_packet(&greeting_raw) {
            let err = parse_err_packet(&greeting_raw, CLIENT_PROTOCOL_41)?;
            return Err(ProxyError::Handshake(format!(
                "backend refused connection: {} ({})",
                err.error_message, err.error_code
            )));
        }
        let greeting = parse_handshake_v10(&greeting_raw)?;
        let backend_caps = greeting.capability_flags();

        let token = session
            .token()
            .ok_or_else(|| ProxyError::RedirectFailed("no session token available".into()))?
            .to_vec();

        // The token can exceed 255 bytes, so the length-encoded auth
        // response form is always required here.
        let mut capability_flags = (session.capabilities & backend_caps)
            | CLIENT_PROTOCOL_41
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH
            | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
        if session.database.is_some() {
            capability_flags |= CLIENT_CONNECT_WITH_DB;
        }
        if !session.attrs.is_empty() {
            capability_flags |= CLIENT_CONNECT_ATTRS;
        }

        let mut response = HandshakeResponse41 {
            capability_flags,
            max_packet_size: 0x00FF_FFFF,
            character_set: session.collation,
            reserved: [0u8; 23],
            username: session.username.clone(),
            auth_response: token,
            database: session.database.clone(),
            auth_plugin_name: Some(issuer.plugin_name().to_string()),
            connect_attrs: if session.attrs.is_empty() {
                None
            } else {
                Some(session.attrs.clone())
            },
        };

        if let Some((connector, host)) = backend_tls {
            response.capability_flags |= CLIENT_SSL;
            backend
                .write_packet(
                    &build_ssl_request(
                        response.capability_flags,
                        response.max_packet_size,
                        response.character_set,
                    ),
                    true,
                )
                .await?;
            backend.upgrade_to_tls_client(connector, host).await?;
        }
        backend
            .write_packet(&build_handshake_response41(&response), true)
            .await?;

        let reply = backend.read_packet().await?;
        match reply.first().copied() {
            Some(OK_HEADER) => {
                debug!(user = %session.username, "session token accepted");
                Ok(())
            }
            Some(EOF_HEADER) => {
                let plugin = parse_auth_switch_request(&reply)
                    .map(|r| r.plugin_name)
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(ProxyError::AuthPluginUnsupported(plugin))
            }
            Some(ERR_HEADER) => {
                let err = parse_err_packet(&reply, CLIENT_PROTOCOL_41)?;
                Err(ProxyError::Handshake(format!(
                    "backend rejected session token: {} ({})",
                    err.error_message, err.error_code
                )))
            }
            other => Err(ProxyError::Protocol(format!(
                "unexpected packet during token authentication: {:#04x}",
                other.unwrap_or(0)
            ))),
        }
    }

    /// Trimmed re-authentication for `COM_CHANGE_USER`.
    ///
    /// The command payload is forwarded verbatim; any switch or
    /// more-data exchange is relayed, and the shadow state is updated
    /// only once the backend accepts the new identity.
    pub async fn change_user(
        &self,
        client: &mut PacketIo,
        backend: &mut PacketIo,
        session: &mut SessionState,
        payload: &[u8],
    ) -> Result<()> {
        let request = parse_change_user(payload, session.capabilities)?;
        backend.write_packet(payload, true).await?;

        let (outcome, switched) = relay_auth_outcome(client, backend).await?;
        if is_err_packet(&outcome) {
            // The backend kept the old identity; so do we.
            return Ok(());
        }

        session.username = request.username;
        session.database = if request.database.is_empty() {
            None
        } else {
            Some(request.database)
        };
        session.collation = request.character_set as u8;
        if let Some(attrs) = request.connect_attrs {
            session.attrs = attrs;
        }
        if let Some(plugin) = switched.or(request.auth_plugin_name) {
            session.auth_plugin = plugin;
        }
        debug!(user = %session.username, "user changed");
        Ok(())
    }
}

/// Relay the tail of an authentication dialog until the backend settles
/// on OK or ERR. Both terminal packets are forwarded to the client before
/// returning. Yields the terminal packet and the plugin the dialog
/// switched to, if any.
async fn relay_auth_outcome(
    client: &mut PacketIo,
    backend: &mut PacketIo,
) -> Result<(Vec<u8>, Option<String>)> {
    let mut switched = None;
    loop {
        let packet = backend.read_packet().await?;
        match packet.first().copied() {
            Some(OK_HEADER) | Some(ERR_HEADER) => {
                client.write_packet(&packet, true).await?;
                return Ok((packet, switched));
            }
            Some(EOF_HEADER) => {
                let switch = parse_auth_switch_request(&packet)?;
                debug!("backend requested switch to {}", switch.plugin_name);
                switched = Some(switch.plugin_name);
                client.write_packet(&packet, true).await?;
                let response = client.read_packet().await?;
                backend.write_packet(&response, true).await?;
            }
            Some(AUTH_MORE_DATA_HEADER) => {
                client.write_packet(&packet, true).await?;
                if packet.len() == 2 && packet[1] == CACHING_SHA2_FAST_AUTH_SUCCESS {
                    // fast-auth success, the OK follows on its own
                    continue;
                }
                let response = client.read_packet().await?;
                backend.write_packet(&response, true).await?;
            }
            other => {
                return Err(ProxyError::Protocol(format!(
                    "unexpected packet during authentication: {:#04x}",
                    other.unwrap_or(0)
                )))
            }
        }
    }
}
