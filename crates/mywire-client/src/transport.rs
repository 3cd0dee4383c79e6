//! Byte-stream transports used by the connection drivers.
//!
//! The protocol code never touches a socket. It asks a [`Transport`] (or an
//! [`AsyncTransport`]) for "some bytes" or to "take some bytes" and works
//! with whatever amount the stream managed to move. Upgrading to TLS is an
//! optional capability: a transport that cannot do it says so through
//! [`Transport::supports_tls`] and the handshake carries on in plaintext
//! when the SSL mode allows it.
//!
//! [`Stream`] and [`AsyncStream`] are the TCP implementations, with rustls
//! layered on top when the `tls` feature is enabled.

use std::future::Future;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::pin::Pin;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use mywire_core::{ConnectionErrorKind, Error, Result};

use crate::config::MySqlConfig;
#[cfg(feature = "tls")]
use crate::tls;

fn tls_unsupported() -> Error {
    Error::connection(
        ConnectionErrorKind::Ssl,
        "this transport cannot be upgraded to TLS",
    )
}

fn closed() -> Error {
    Error::connection(ConnectionErrorKind::Disconnected, "transport is closed")
}

/// Blocking byte stream.
///
/// An `Interrupted` I/O error is not fatal: the drivers call the same method
/// again.
pub trait Transport {
    /// Read at least one byte into `buf`, or return 0 at end of stream.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write a prefix of `buf`, returning how many bytes went out.
    fn write_some(&mut self, buf: &[u8]) -> Result<usize>;

    /// Can [`tls_handshake`](Self::tls_handshake) be called?
    fn supports_tls(&self) -> bool {
        false
    }

    /// Upgrade the stream to TLS in place.
    fn tls_handshake(&mut self, _config: &MySqlConfig) -> Result<()> {
        Err(tls_unsupported())
    }

    /// Flush and shut the stream down. Called once, from `close`.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Suspendable byte stream, driven by the asupersync runtime.
pub trait AsyncTransport: Send {
    fn read_some(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    fn write_some(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    fn supports_tls(&self) -> bool {
        false
    }

    fn tls_handshake(
        &mut self,
        _config: &MySqlConfig,
    ) -> impl Future<Output = Result<()>> + Send {
        async { Err(tls_unsupported()) }
    }

    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

fn resolve(config: &MySqlConfig) -> Result<Vec<SocketAddr>> {
    let addr = config.socket_addr();
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| {
            Error::connection(
                ConnectionErrorKind::DnsResolution,
                format!("failed to resolve {addr}: {e}"),
            )
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::connection(
            ConnectionErrorKind::DnsResolution,
            format!("{addr} did not resolve to any address"),
        ));
    }
    Ok(addrs)
}

fn connect_error(addr: &SocketAddr, e: &std::io::Error) -> Error {
    let kind = if e.kind() == std::io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Error::connection(kind, format!("failed to connect to {addr}: {e}"))
}

/// Blocking TCP stream, optionally upgraded to TLS.
pub enum Stream {
    Plain(StdTcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tls::TlsStream<StdTcpStream>>),
    Closed,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Plain(s) => f.debug_tuple("Plain").field(s).finish(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => f.debug_tuple("Tls").field(s).finish(),
            Stream::Closed => f.write_str("Closed"),
        }
    }
}

impl Stream {
    /// Connect to `config.host:config.port`, trying each resolved address
    /// in turn.
    pub fn connect(config: &MySqlConfig) -> Result<Self> {
        let mut last_error = None;
        for addr in resolve(config)? {
            match StdTcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%addr, "tcp connection established");
                    return Ok(Stream::Plain(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp connect failed");
                    last_error = Some(connect_error(&addr, &e));
                }
            }
        }
        Err(last_error.unwrap_or_else(closed))
    }
}

impl Transport for Stream {
    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Stream::Plain(s) => Ok(s.read(buf)?),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => Ok(s.read(buf)?),
            Stream::Closed => Err(closed()),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            Stream::Plain(s) => Ok(s.write(buf)?),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => {
                let n = s.write(buf)?;
                s.flush()?;
                Ok(n)
            }
            Stream::Closed => Err(closed()),
        }
    }

    fn supports_tls(&self) -> bool {
        cfg!(feature = "tls") && matches!(self, Stream::Plain(_))
    }

    #[cfg(feature = "tls")]
    fn tls_handshake(&mut self, config: &MySqlConfig) -> Result<()> {
        match std::mem::replace(self, Stream::Closed) {
            Stream::Plain(tcp) => {
                let stream = tls::TlsStream::new(tcp, &config.tls, &config.host, config.ssl_mode)?;
                *self = Stream::Tls(Box::new(stream));
                Ok(())
            }
            other => {
                *self = other;
                Err(tls_unsupported())
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        match std::mem::replace(self, Stream::Closed) {
            Stream::Plain(s) => {
                s.shutdown(std::net::Shutdown::Both)?;
                Ok(())
            }
            #[cfg(feature = "tls")]
            Stream::Tls(mut s) => {
                s.close_notify();
                s.flush()?;
                Ok(())
            }
            Stream::Closed => Ok(()),
        }
    }
}

/// Asynchronous TCP stream, optionally upgraded to TLS.
pub enum AsyncStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tls::AsyncTlsStream>),
    Closed,
}

impl std::fmt::Debug for AsyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncStream::Plain(_) => f.write_str("Plain"),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(_) => f.write_str("Tls"),
            AsyncStream::Closed => f.write_str("Closed"),
        }
    }
}

impl AsyncStream {
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        let mut last_error = None;
        for addr in resolve(config)? {
            match TcpStream::connect_timeout(addr, config.connect_timeout).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%addr, "tcp connection established");
                    return Ok(AsyncStream::Plain(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "tcp connect failed");
                    last_error = Some(connect_error(&addr, &e));
                }
            }
        }
        Err(last_error.unwrap_or_else(closed))
    }
}

pub(crate) async fn read_some_plain(stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut read_buf = ReadBuf::new(buf);
    std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_read(cx, &mut read_buf)).await?;
    Ok(read_buf.filled().len())
}

pub(crate) async fn write_some_plain(stream: &mut TcpStream, buf: &[u8]) -> std::io::Result<usize> {
    std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_write(cx, buf)).await
}

pub(crate) async fn write_all_plain(stream: &mut TcpStream, buf: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = write_some_plain(stream, &buf[written..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "connection closed",
            ));
        }
        written += n;
    }
    Ok(())
}

pub(crate) async fn flush_plain(stream: &mut TcpStream) -> std::io::Result<()> {
    std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_flush(cx)).await
}

impl AsyncTransport for AsyncStream {
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            AsyncStream::Plain(s) => Ok(read_some_plain(s, buf).await?),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(s) => Ok(s.read_plain(buf).await?),
            AsyncStream::Closed => Err(closed()),
        }
    }

    async fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            AsyncStream::Plain(s) => Ok(write_some_plain(s, buf).await?),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(s) => {
                s.write_all(buf).await?;
                Ok(buf.len())
            }
            AsyncStream::Closed => Err(closed()),
        }
    }

    fn supports_tls(&self) -> bool {
        cfg!(feature = "tls") && matches!(self, AsyncStream::Plain(_))
    }

    #[cfg(feature = "tls")]
    async fn tls_handshake(&mut self, config: &MySqlConfig) -> Result<()> {
        match std::mem::replace(self, AsyncStream::Closed) {
            AsyncStream::Plain(tcp) => {
                let stream = tls::AsyncTlsStream::handshake(tcp, config).await?;
                *self = AsyncStream::Tls(Box::new(stream));
                Ok(())
            }
            other => {
                *self = other;
                Err(tls_unsupported())
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        match std::mem::replace(self, AsyncStream::Closed) {
            AsyncStream::Plain(mut s) => Ok(flush_plain(&mut s).await?),
            #[cfg(feature = "tls")]
            AsyncStream::Tls(mut s) => Ok(s.close().await?),
            AsyncStream::Closed => Ok(()),
        }
    }
}
