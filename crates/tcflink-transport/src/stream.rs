use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{Result, TransportError};

/// TLS settings for upgrading a raw socket before use.
#[derive(Clone)]
pub struct TlsConfig {
    /// Client configuration (roots, certificates) supplied by the caller.
    pub client_config: Arc<ClientConfig>,
    /// Name presented for SNI and certificate checks. Defaults to the host.
    pub server_name: Option<String>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Where and how to open a socket to a remote agent.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub host: String,
    pub port: u16,
    /// Connect timeout. `None` leaves it to the operating system.
    pub connect_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the connected socket.
    pub nodelay: bool,
    /// Upgrade to TLS after connecting.
    pub tls: Option<TlsConfig>,
}

impl SocketConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: None,
            nodelay: true,
            tls: None,
        }
    }

    /// `host:port` for diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A connected byte stream to a remote agent, plain or encrypted.
pub enum SocketStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl SocketStream {
    /// Whether the stream was upgraded to TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Plain(_) => "tcp",
            Self::Tls(_) => "ssl",
        }
    }
}

impl std::fmt::Debug for SocketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

impl From<TcpStream> for SocketStream {
    fn from(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }
}

impl AsyncRead for SocketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connect to the agent described by `config`, upgrading to TLS if requested.
pub async fn connect(config: &SocketConfig) -> Result<SocketStream> {
    let addr = config.addr();
    let connecting = TcpStream::connect((config.host.as_str(), config.port));
    let stream = match config.connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, connecting).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no connection after {limit:?}"),
            )),
        },
        None => connecting.await,
    }
    .map_err(|source| TransportError::Connect {
        addr: addr.clone(),
        source,
    })?;

    if config.nodelay {
        stream.set_nodelay(true)?;
    }
    debug!(%addr, "socket connected");

    let Some(tls) = &config.tls else {
        return Ok(SocketStream::Plain(stream));
    };

    let name = tls.server_name.clone().unwrap_or_else(|| config.host.clone());
    let server_name = ServerName::try_from(name)
        .map_err(|err| TransportError::Tls(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
    let connector = TlsConnector::from(Arc::clone(&tls.client_config));
    let stream = connector
        .connect(server_name, stream)
        .await
        .map_err(TransportError::Tls)?;
    debug!(%addr, "TLS handshake complete");
    Ok(SocketStream::Tls(Box::new(stream)))
}
