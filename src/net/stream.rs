//! Network stream abstraction for TCP and TLS connections
//!
//! This module provides `NetworkStream`, a unified type that can represent
//! either a plain TCP connection or a TLS-encrypted connection. The packet
//! layer works with streams generically and upgrades them in place when the
//! SSL capability is negotiated.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

/// A network stream that can be either plain TCP or TLS-encrypted
///
/// The TLS variants are boxed to reduce the size difference between
/// variants, as `TlsStream` is significantly larger than `TcpStream`.
pub enum NetworkStream {
    /// Plain TCP connection
    Tcp(TcpStream),
    /// TLS-encrypted connection (server-side, facing a MySQL client)
    ServerTls(Box<ServerTlsStream<TcpStream>>),
    /// TLS-encrypted connection (client-side, facing a MySQL backend)
    ClientTls(Box<ClientTlsStream<TcpStream>>),
}

impl NetworkStream {
    /// Create a new TCP stream wrapper
    pub fn tcp(stream: TcpStream) -> Self {
        NetworkStream::Tcp(stream)
    }

    /// Check if this stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            NetworkStream::ServerTls(_) | NetworkStream::ClientTls(_)
        )
    }

    /// Get the TLS protocol version if this is a TLS stream
    pub fn tls_version(&self) -> Option<&'static str> {
        let version = match self {
            NetworkStream::Tcp(_) => return None,
            NetworkStream::ServerTls(tls) => tls.get_ref().1.protocol_version(),
            NetworkStream::ClientTls(tls) => tls.get_ref().1.protocol_version(),
        };
        version.map(|v| match v {
            rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
            rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
            _ => "TLS (unknown version)",
        })
    }

    /// Extract the TCP stream for TLS upgrade
    ///
    /// Returns `Ok(TcpStream)` if this is a plain TCP stream, allowing it
    /// to be upgraded to TLS. Returns `Err(self)` if this is already a TLS
    /// stream.
    pub fn into_tcp(self) -> Result<TcpStream, Self> {
        match self {
            NetworkStream::Tcp(stream) => Ok(stream),
            other => Err(other),
        }
    }

    /// Get a reference to the underlying TCP stream
    pub fn tcp_ref(&self) -> &TcpStream {
        match self {
            NetworkStream::Tcp(stream) => stream,
            NetworkStream::ServerTls(tls) => tls.get_ref().0,
            NetworkStream::ClientTls(tls) => tls.get_ref().0,
        }
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
