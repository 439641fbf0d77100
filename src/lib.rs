//! roamdb-proxy - MySQL-compatible intercepting proxy
//!
//! This library provides the core of a transparent MySQL intermediary
//! that:
//! - terminates a MySQL client connection and dials a backend server,
//!   bridging the two handshakes with capability masking and auth-plugin
//!   switching
//! - forwards the command phase byte-faithfully, keeping the per-side
//!   packet sequence counters in lockstep
//! - supports TLS on either side, upgraded mid-stream as the protocol
//!   requires
//! - can silently re-bind a live session to a different backend at a
//!   command boundary, replaying the session's identity with a
//!   server-minted token instead of the user's credentials
//!
//! Backend selection and token issuance are pluggable via the
//! [`BackendSelector`] and [`TokenIssuer`] traits.

#[macro_use]
mod logging;

pub mod auth;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod server;
pub mod tls;

pub use auth::{
    Authenticator, BackendSelector, BackendTarget, SessionState, TokenIssuer,
    MAX_SESSION_TOKEN_LEN, SUPPORTED_CAPABILITIES,
};
pub use config::{KeepaliveConfig, ProxyConfig};
pub use error::{ProxyError, Result};
pub use net::{NetworkStream, PacketIo, ProxyHeader, MAX_PAYLOAD_LEN};
pub use server::{ClientConnection, Listener, ListenerStats, RedirectHandle};
pub use tls::{
    TlsAcceptor, TlsClientConfig, TlsConnector, TlsError, TlsServerConfig, TlsVerifyMode,
};
