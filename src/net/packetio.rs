//! MySQL packet I/O
//!
//! `PacketIo` is a framed, buffered, sequence-tracking duplex channel
//! carrying MySQL packets over one transport connection. Both peers of a
//! MySQL connection share a monotonically increasing sequence number that
//! is part of every 4-byte packet header, so framing and sequence tracking
//! live together in this layer rather than in the forwarding logic.
//!
//! A payload of `MAX_PAYLOAD_LEN` bytes or more is split into chunks; a
//! payload whose length is an exact multiple of `MAX_PAYLOAD_LEN` is
//! terminated by an extra zero-length packet so the reader can detect the
//! end of the logical payload.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::config::KeepaliveConfig;
use crate::error::{ProxyError, Result};
use crate::net::keepalive;
use crate::net::proxy_protocol::{self, ProxyHeader};
use crate::net::stream::NetworkStream;
use crate::tls::{TlsAcceptor, TlsConnector, TlsError};

/// Maximum payload size of a single MySQL packet (2^24 - 1).
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

const DEFAULT_READER_SIZE: usize = 16 * 1024;
const DEFAULT_WRITER_SIZE: usize = 16 * 1024;

type BufferedStream = BufReader<BufWriter<NetworkStream>>;

/// A buffered MySQL packet channel over one transport connection.
///
/// Not safe for concurrent use: all methods take `&mut self` and must be
/// driven from the owning task. The only supported form of cross-task
/// interaction is cancelling pending reads through the
/// [`cancellation_token`](Self::cancellation_token) handle.
pub struct PacketIo {
    stream: Option<BufferedStream>,
    sequence: u8,
    in_bytes: u64,
    out_bytes: u64,
    cancel: CancellationToken,
    last_keepalive: Option<KeepaliveConfig>,
    proxy_expected: bool,
    proxy_checked: bool,
    proxy_header: Option<ProxyHeader>,
}

impl PacketIo {
    /// Wrap an accepted or dialed TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(Self::buffer(NetworkStream::tcp(stream))),
            sequence: 0,
            in_bytes: 0,
            out_bytes: 0,
            cancel: CancellationToken::new(),
            last_keepalive: None,
            proxy_expected: false,
            proxy_checked: false,
            proxy_header: None,
        }
    }

    /// Replace the cancellation token, e.g. to share one token across the
    /// client and backend sides of a session.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that interrupts pending reads when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Expect a PROXY protocol v1/v2 preamble before the first packet.
    ///
    /// The preamble is consumed lazily on the first read. Once enabled, a
    /// connection that does not start with a preamble is rejected, as the
    /// PROXY protocol requires.
    pub fn enable_proxy_protocol(&mut self) {
        self.proxy_expected = true;
    }

    /// The effective client address: the PROXY protocol source if one was
    /// decoded, otherwise `None`.
    pub fn proxy_peer_addr(&self) -> Option<SocketAddr> {
        self.proxy_header.as_ref().and_then(|h| h.source)
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let stream = self.stream_ref()?;
        stream
            .get_ref()
            .get_ref()
            .tcp_ref()
            .local_addr()
            .map_err(ProxyError::Io)
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let stream = self.stream_ref()?;
        stream
            .get_ref()
            .get_ref()
            .tcp_ref()
            .peer_addr()
            .map_err(ProxyError::Io)
    }

    /// Whether the connection has been upgraded to TLS.
    pub fn is_encrypted(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|s| s.get_ref().get_ref().is_encrypted())
    }

    /// Reset the sequence counter. Called at the start of each command
    /// cycle and after certain handshake transitions.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Overwrite the sequence counter.
    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    /// The sequence number the next packet header must carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Total bytes read from the transport, headers included.
    pub fn in_bytes(&self) -> u64 {
        self.in_bytes
    }

    /// Total bytes written to the transport, headers included.
    pub fn out_bytes(&self) -> u64 {
        self.out_bytes
    }

    /// Read the next logical payload, reassembled across 16 MiB chunks.
    ///
    /// Fails with [`ProxyError::InvalidSequence`] if a header's sequence
    /// byte does not match the locally expected value; the payload behind
    /// a bad header is not consumed. Any framing error is fatal to this
    /// `PacketIo` and the caller must close it.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        if self.proxy_expected && !self.proxy_checked {
            self.consume_proxy_header().await?;
        }
        let (mut data, mut more) = self.read_one_packet().await?;
        while more {
            let (chunk, m) = self.read_one_packet().await?;
            data.extend_from_slice(&chunk);
            more = m;
        }
        Ok(data)
    }

    /// Frame and emit a payload, splitting into `MAX_PAYLOAD_LEN` chunks
    /// as required and appending a zero-length trailer when the payload
    /// length is an exact multiple of `MAX_PAYLOAD_LEN`.
    ///
    /// If `flush` is true the buffered writer is drained to the transport
    /// before returning.
    pub async fn write_packet(&mut self, mut data: &[u8], flush: bool) -> Result<()> {
        let mut more = true;
        while more {
            let (written, m) = self.write_one_packet(data).await?;
            data = &data[written..];
            more = m;
        }
        if flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain the buffered writer to the transport.
    pub async fn flush(&mut self) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.flush().await.map_err(ProxyError::FlushConn)
    }

    /// Write bytes to the transport, bypassing packet framing.
    ///
    /// Used for data that must not be interleaved with MySQL frames, such
    /// as a PROXY protocol preamble. Any buffered frames are flushed
    /// first so ordering is preserved.
    pub async fn direct_write(&mut self, data: &[u8]) -> Result<usize> {
        self.flush().await?;
        let stream = self.stream_mut()?;
        let inner = stream.get_mut().get_mut();
        inner.write_all(data).await.map_err(ProxyError::WriteConn)?;
        inner.flush().await.map_err(ProxyError::FlushConn)?;
        self.out_bytes += data.len() as u64;
        Ok(data.len())
    }

    /// Perform a server-side TLS handshake in place.
    ///
    /// Must be called at a protocol quiescent point: buffered output is
    /// flushed, and no unread input may be pending. The sequence counter
    /// carries over, as the MySQL handshake continues counting across the
    /// TLS upgrade.
    pub async fn upgrade_to_tls_server(&mut self, acceptor: &TlsAcceptor) -> Result<()> {
        self.flush().await?;
        let tcp = self.take_tcp()?;
        let tls = acceptor.accept(tcp).await?;
        self.stream = Some(Self::buffer(NetworkStream::ServerTls(Box::new(tls))));
        Ok(())
    }

    /// Perform a client-side TLS handshake in place.
    ///
    /// Same quiescence requirements as
    /// [`upgrade_to_tls_server`](Self::upgrade_to_tls_server).
    pub async fn upgrade_to_tls_client(
        &mut self,
        connector: &TlsConnector,
        server_name: &str,
    ) -> Result<()> {
        self.flush().await?;
        let tcp = self.take_tcp()?;
        let tls = connector.connect(tcp, server_name).await?;
        self.stream = Some(Self::buffer(NetworkStream::ClientTls(Box::new(tls))));
        Ok(())
    }

    /// Resolve once at least one byte can be read, consuming nothing.
    ///
    /// Lets a caller park at a protocol boundary and stay interruptible:
    /// unlike `read_packet` this is safe to race in a `select!`, since
    /// losing the race consumes no bytes. Under TLS readiness reflects
    /// ciphertext arrival, so the follow-up read may still wait for a
    /// complete record.
    pub async fn readable(&self) -> Result<()> {
        let stream = self.stream_ref()?;
        if !stream.buffer().is_empty() {
            return Ok(());
        }
        stream
            .get_ref()
            .get_ref()
            .tcp_ref()
            .readable()
            .await
            .map_err(ProxyError::ReadConn)
    }

    /// Non-destructive liveness probe.
    ///
    /// Peeks a single byte off the raw socket with a 1 ms deadline and
    /// consumes nothing. Returns `false` if the peer has closed or the
    /// probe fails; returns `true` otherwise, including when the deadline
    /// expires with no data (the connection is idle but open). Under TLS
    /// the probe observes ciphertext arrival, so this is a hint, never a
    /// correctness input. A call typically costs 1 ms; throttle it.
    pub async fn is_peer_active(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        if !stream.buffer().is_empty() {
            return true;
        }
        let tcp = stream.get_ref().get_ref().tcp_ref();
        let mut probe = [0u8; 1];
        match tokio::time::timeout(Duration::from_millis(1), tcp.peek(&mut probe)).await {
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => true,
            Ok(Err(_)) => false,
            Err(_) => true,
        }
    }

    /// Interrupt pending reads without tearing down the transport.
    ///
    /// A supervisor uses this to break a forwarding loop out of a blocked
    /// read; the interrupted read returns a [`ProxyError::ReadConn`].
    pub fn graceful_close(&self) {
        self.cancel.cancel();
    }

    /// Close the transport.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                if e.kind() != io::ErrorKind::NotConnected {
                    return Err(ProxyError::CloseConn(e));
                }
            }
        }
        Ok(())
    }

    /// Apply OS-level keepalive settings.
    ///
    /// Idempotent: applying the same configuration as the previous call is
    /// a no-op.
    pub fn set_keepalive(&mut self, cfg: &KeepaliveConfig) -> Result<()> {
        if self.last_keepalive.as_ref() == Some(cfg) {
            return Ok(());
        }
        let stream = self.stream_ref()?;
        keepalive::apply(stream.get_ref().get_ref().tcp_ref(), cfg)?;
        self.last_keepalive = Some(cfg.clone());
        Ok(())
    }

    fn buffer(stream: NetworkStream) -> BufferedStream {
        BufReader::with_capacity(
            DEFAULT_READER_SIZE,
            BufWriter::with_capacity(DEFAULT_WRITER_SIZE, stream),
        )
    }

    fn stream_ref(&self) -> Result<&BufferedStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| ProxyError::Connection("connection already closed".into()))
    }

    fn stream_mut(&mut self) -> Result<&mut BufferedStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| ProxyError::Connection("connection already closed".into()))
    }

    /// Unwrap down to the raw TCP stream for a TLS upgrade.
    ///
    /// Discards the (empty, by contract) read buffer.
    fn take_tcp(&mut self) -> Result<TcpStream> {
        let buffered = self
            .stream
            .take()
            .ok_or_else(|| ProxyError::Connection("connection already closed".into()))?;
        let inner = buffered.into_inner().into_inner();
        match inner.into_tcp() {
            Ok(tcp) => Ok(tcp),
            Err(stream) => {
                self.stream = Some(Self::buffer(stream));
                Err(ProxyError::Tls(TlsError::config(
                    "connection is already using TLS",
                )))
            }
        }
    }

    async fn read_exact_counted(&mut self, buf: &mut [u8]) -> Result<()> {
        let cancel = self.cancel.clone();
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ProxyError::Connection("connection already closed".into()))?;
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "connection is shutting down",
            )),
            r = stream.read_exact(buf) => r.map(|_| ()),
        };
        match res {
            Ok(()) => {
                self.in_bytes += buf.len() as u64;
                Ok(())
            }
            Err(e) => Err(ProxyError::ReadConn(e)),
        }
    }

    async fn write_all_counted(&mut self, buf: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(buf).await.map_err(ProxyError::WriteConn)?;
        self.out_bytes += buf.len() as u64;
        Ok(())
    }

    async fn read_one_packet(&mut self) -> Result<(Vec<u8>, bool)> {
        let mut header = [0u8; 4];
        self.read_exact_counted(&mut header).await?;

        let expected = self.sequence;
        if header[3] != expected {
            return Err(ProxyError::InvalidSequence {
                expected,
                actual: header[3],
            });
        }
        self.sequence = self.sequence.wrapping_add(1);

        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let mut payload = vec![0u8; length];
        self.read_exact_counted(&mut payload).await?;
        Ok((payload, length == MAX_PAYLOAD_LEN))
    }

    async fn write_one_packet(&mut self, data: &[u8]) -> Result<(usize, bool)> {
        let mut length = data.len();
        let mut more = false;
        if length >= MAX_PAYLOAD_LEN {
            // another packet is needed, even when the current one is
            // exactly MAX_PAYLOAD_LEN long
            length = MAX_PAYLOAD_LEN;
            more = true;
        }

        let header = [
            length as u8,
            (length >> 8) as u8,
            (length >> 16) as u8,
            self.sequence,
        ];
        self.sequence = self.sequence.wrapping_add(1);

        self.write_all_counted(&header).await?;
        self.write_all_counted(&data[..length]).await?;
        Ok((length, more))
    }

    /// Consume the mandatory PROXY protocol preamble.
    async fn consume_proxy_header(&mut self) -> Result<()> {
        self.proxy_checked = true;

        let mut first = [0u8; 1];
        self.read_exact_counted(&mut first).await?;

        let header = match first[0] {
            b'P' => {
                let mut rest = [0u8; 5];
                self.read_exact_counted(&mut rest).await?;
                if &rest != b"ROXY " {
                    return Err(ProxyError::Protocol(
                        "malformed PROXY protocol v1 preamble".into(),
                    ));
                }
                let mut line = Vec::with_capacity(64);
                loop {
                    let mut byte = [0u8; 1];
                    self.read_exact_counted(&mut byte).await?;
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                    if line.len() > proxy_protocol::V1_MAX_LEN {
                        return Err(ProxyError::Protocol(
                            "PROXY protocol v1 preamble too long".into(),
                        ));
                    }
                }
                if line.pop() != Some(b'\r') {
                    return Err(ProxyError::Protocol(
                        "PROXY protocol v1 preamble missing CRLF".into(),
                    ));
                }
                proxy_protocol::parse_v1(&line)?
            }
            0x0D => {
                let mut sig = [0u8; 11];
                self.read_exact_counted(&mut sig).await?;
                if sig[..] != proxy_protocol::SIG_V2[1..] {
                    return Err(ProxyError::Protocol(
                        "malformed PROXY protocol v2 signature".into(),
                    ));
                }
                let mut head = [0u8; 4];
                self.read_exact_counted(&mut head).await?;
                let len = u16::from_be_bytes([head[2], head[3]]) as usize;
                let mut body = vec![0u8; len];
                self.read_exact_counted(&mut body).await?;
                proxy_protocol::parse_v2(head[0], head[1], &body)?
            }
            _ => {
                return Err(ProxyError::Protocol(
                    "PROXY protocol preamble expected".into(),
                ))
            }
        };

        if let Some(source) = header.source {
            debug!("PROXY protocol peer address: {}", source);
        }
        self.proxy_header = Some(header);
        Ok(())
    }
}
