//! Session shadow state

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{ProxyError, Result};

/// Upper bound on the size of a session token accepted from an issuer.
pub const MAX_SESSION_TOKEN_LEN: usize = 512;

/// Everything the proxy must remember about a logical session to re-bind
/// it to a different backend without involving the client.
///
/// Owned exclusively by the session's connection task; never shared
/// between sessions. The token is wiped from memory on drop.
pub struct SessionState {
    /// Username the client authenticated as
    pub username: String,
    /// Currently selected database, tracked across `USE` and change-user
    pub database: Option<String>,
    /// Negotiated character set / collation byte
    pub collation: u8,
    /// Connection attributes in client order
    pub attrs: Vec<(String, String)>,
    /// Effective capability mask (client ∩ backend ∩ proxy)
    pub capabilities: u32,
    /// Auth plugin the session settled on
    pub auth_plugin: String,
    session_token: Option<Zeroizing<Vec<u8>>>,
}

impl SessionState {
    /// Create the shadow state recorded after a successful first-time
    /// handshake. The token is minted separately.
    pub fn new(
        username: String,
        database: Option<String>,
        collation: u8,
        attrs: Vec<(String, String)>,
        capabilities: u32,
        auth_plugin: String,
    ) -> Self {
        Self {
            username,
            database,
            collation,
            attrs,
            capabilities,
            auth_plugin,
            session_token: None,
        }
    }

    /// Store a freshly minted token, replacing (and wiping) any previous
    /// one. Tokens longer than [`MAX_SESSION_TOKEN_LEN`] are rejected.
    pub fn set_token(&mut self, token: Vec<u8>) -> Result<()> {
        if token.len() > MAX_SESSION_TOKEN_LEN {
            return Err(ProxyError::Protocol(format!(
                "session token exceeds {} bytes",
                MAX_SESSION_TOKEN_LEN
            )));
        }
        self.session_token = Some(Zeroizing::new(token));
        Ok(())
    }

    /// The current session token, if one has been minted.
    pub fn token(&self) -> Option<&[u8]> {
        self.session_token.as_deref().map(|t| t.as_slice())
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("username", &self.username)
            .field("database", &self.database)
            .field("collation", &self.collation)
            .field("capabilities", &format_args!("{:#010x}", self.capabilities))
            .field("auth_plugin", &self.auth_plugin)
            .field("has_token", &self.session_token.is_some())
            .finish()
    }
}
