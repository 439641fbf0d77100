//! Session token issuance seam

use async_trait::async_trait;

use crate::error::Result;

use super::SessionState;

/// Trait for pluggable session token issuance.
///
/// A token is an opaque, short-lived byte string accepted by a
/// cooperating backend as proof of identity in place of a password. The
/// proxy mints one after the first handshake and again at every session
/// re-bind; only the most recently minted token is valid. How tokens are
/// generated and how the backend's auth plugin verifies them is entirely
/// the issuer's business.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Mint a token bound to the given session.
    ///
    /// The result must not exceed
    /// [`MAX_SESSION_TOKEN_LEN`](super::MAX_SESSION_TOKEN_LEN) bytes.
    async fn mint(&self, session: &SessionState) -> Result<Vec<u8>>;

    /// Name of the auth plugin a backend uses to verify minted tokens.
    ///
    /// Sent as the plugin name in the token-based handshake response. By
    /// contract the backend accepts it without requesting a plugin
    /// switch.
    fn plugin_name(&self) -> &str;
}
