//! Transport layer: buffered MySQL packet I/O over TCP or TLS
//!
//! The packet channel ([`PacketIo`]) owns one transport connection and
//! speaks MySQL's 4-byte-header framing, including multi-packet payloads
//! and the per-connection sequence counter. TLS upgrades happen in place,
//! and an optional PROXY protocol preamble can be consumed ahead of the
//! first packet.

mod keepalive;
mod packetio;
pub mod proxy_protocol;
mod stream;

pub use packetio::{PacketIo, MAX_PAYLOAD_LEN};
pub use proxy_protocol::ProxyHeader;
pub use stream::NetworkStream;
