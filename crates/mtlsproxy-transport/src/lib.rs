//! Socket establishment for proxy profiles.
//!
//! A [`SocketInfo`] is the resolved description of one side of a profile:
//! optional TLS settings, a protocol name, and an address. The listen
//! side carries a server-side acceptor applied per accepted connection;
//! the destination side carries a client-side connector used when
//! dialing. Only stream protocols are supported; anything other than
//! `tcp` is rejected when the socket is opened.

pub mod error;
pub mod tls;

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};

pub use error::TransportError;

/// Marker trait for streams usable by a forwarding session.
pub trait TransportStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> TransportStream for T {}

/// TLS handle for one side of a profile.
#[derive(Clone)]
pub enum TlsSettings {
    /// Terminate TLS on accepted connections.
    Server(TlsAcceptor),
    /// Originate TLS on dialed connections.
    Client(TlsConnector),
}

/// Where and how to open a socket: optional TLS, protocol, address.
/// Cheap to clone; the TLS handles are Arc-backed.
#[derive(Clone)]
pub struct SocketInfo {
    pub tls: Option<TlsSettings>,
    pub protocol: String,
    pub addr: String,
}

impl SocketInfo {
    /// The server-side TLS acceptor, when this is a listen-side info with
    /// TLS configured.
    pub fn acceptor(&self) -> Option<TlsAcceptor> {
        match &self.tls {
            Some(TlsSettings::Server(acceptor)) => Some(acceptor.clone()),
            _ => None,
        }
    }

    /// Bind the listen socket. TLS, when configured, is applied per
    /// accepted connection via [`SocketInfo::acceptor`].
    pub async fn bind(&self) -> Result<TcpListener, TransportError> {
        self.check_protocol()?;
        Ok(TcpListener::bind(&self.addr).await?)
    }

    /// Dial the destination, completing the TLS handshake when
    /// configured. The TLS server name is taken from the host portion of
    /// the address.
    pub async fn connect(&self) -> Result<ProxyStream, TransportError> {
        self.check_protocol()?;
        let tcp = TcpStream::connect(&self.addr).await?;
        tcp.set_nodelay(true)?;

        match &self.tls {
            None => Ok(ProxyStream::Tcp(tcp)),
            Some(TlsSettings::Client(connector)) => {
                let host = extract_host(&self.addr);
                let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
                    TransportError::Config(format!("invalid destination host {host:?}: {e}"))
                })?;
                let stream = connector.connect(server_name, tcp).await?;
                Ok(ProxyStream::ClientTls(stream))
            }
            Some(TlsSettings::Server(_)) => Err(TransportError::Config(
                "listen-side TLS settings cannot dial".to_string(),
            )),
        }
    }

    fn check_protocol(&self) -> Result<(), TransportError> {
        if self.protocol == "tcp" {
            Ok(())
        } else {
            Err(TransportError::UnsupportedProtocol(self.protocol.clone()))
        }
    }
}

/// An established connection on either side of a forwarding session.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
pub enum ProxyStream {
    /// Plain TCP.
    Tcp(TcpStream),
    /// TLS originated by us (destination side).
    ClientTls(tokio_rustls::client::TlsStream<TcpStream>),
    /// TLS terminated by us (listen side).
    ServerTls(tokio_rustls::server::TlsStream<TcpStream>),
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            ProxyStream::ClientTls(s) => Pin::new(s).poll_read(cx, buf),
            ProxyStream::ServerTls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            ProxyStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            ProxyStream::ClientTls(s) => Pin::new(s).poll_write(cx, buf),
            ProxyStream::ServerTls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            ProxyStream::ClientTls(s) => Pin::new(s).poll_flush(cx),
            ProxyStream::ServerTls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ProxyStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            ProxyStream::ClientTls(s) => Pin::new(s).poll_shutdown(cx),
            ProxyStream::ServerTls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Extract the host portion from an `addr` string, handling `host:port`,
/// `[ipv6]:port`, and bare hosts. Brackets are stripped so the result
/// parses as a TLS server name.
fn extract_host(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    if let Some((host, _port)) = addr.rsplit_once(':') {
        return host;
    }
    addr
}
