//! Handshake bridging and session identity
//!
//! The authenticator conducts the MySQL handshake on both transport sides
//! of a session, reconciles the two capability sets, and carries the
//! credentials needed to re-bind the session to a different backend later.
//! Backend selection and token issuance are pluggable via the
//! [`BackendSelector`] and [`TokenIssuer`] traits.

mod authenticator;
mod selector;
mod session;
mod token;

pub use authenticator::{Authenticator, SUPPORTED_CAPABILITIES};
pub use selector::{BackendSelector, BackendTarget};
pub use session::{SessionState, MAX_SESSION_TOKEN_LEN};
pub use token::TokenIssuer;
