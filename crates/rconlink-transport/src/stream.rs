use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Remote console address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A connected RCON stream implementing `AsyncRead + AsyncWrite`.
///
/// Wraps either a plain TCP socket or a TLS client session over one.
pub struct RconStream {
    inner: RconStreamInner,
}

enum RconStreamInner {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl RconStream {
    /// Wrap an already-connected TCP socket.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: RconStreamInner::Plain(stream),
        }
    }

    /// Whether the stream is TLS-wrapped.
    pub fn is_tls(&self) -> bool {
        match &self.inner {
            RconStreamInner::Plain(_) => false,
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(_) => true,
        }
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> Result<std::net::SocketAddr> {
        match &self.inner {
            RconStreamInner::Plain(stream) => stream.peer_addr().map_err(Into::into),
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(stream) => stream.get_ref().0.peer_addr().map_err(Into::into),
        }
    }
}

impl AsyncRead for RconStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RconStreamInner::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RconStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            RconStreamInner::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RconStreamInner::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            RconStreamInner::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            RconStreamInner::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for RconStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_tls() { "tls" } else { "tcp" };
        f.debug_struct("RconStream").field("type", &kind).finish()
    }
}

/// Open a stream to `endpoint`, optionally wrapping it in TLS.
pub async fn connect(endpoint: &Endpoint, tls: bool) -> Result<RconStream> {
    let addr = endpoint.to_string();
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
    tcp.set_nodelay(true)?;
    debug!(%addr, tls, "tcp connected");

    if !tls {
        return Ok(RconStream::from_tcp(tcp));
    }
    wrap_tls(endpoint, tcp).await
}

#[cfg(feature = "tls")]
async fn wrap_tls(endpoint: &Endpoint, tcp: TcpStream) -> Result<RconStream> {
    use std::sync::Arc;

    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| TransportError::Tls(err.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(endpoint.host.clone())
        .map_err(|_| TransportError::InvalidServerName(endpoint.host.clone()))?;

    let stream = TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|err| TransportError::Tls(format!("handshake with {endpoint} failed: {err}")))?;
    debug!(addr = %endpoint, "tls established");

    Ok(RconStream {
        inner: RconStreamInner::Tls(Box::new(stream)),
    })
}

#[cfg(not(feature = "tls"))]
async fn wrap_tls(_endpoint: &Endpoint, _tcp: TcpStream) -> Result<RconStream> {
    Err(TransportError::TlsUnavailable)
}
