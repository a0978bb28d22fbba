//! Socket transport: plain TCP, TLS, or unix-domain, behind one interface.
//!
//! The driver interacts with a [`Transport`] in two modes. During the
//! synchronous handshake it pulls with [`recv_timeout`](Transport::recv_timeout)
//! (passive). In steady state it awaits [`read_chunk`](Transport::read_chunk),
//! processes the chunk, and only then awaits the next one. Reads are never
//! front-loaded; that is what provides backpressure against the kernel.

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

#[cfg(unix)]
use tokio::net::UnixStream;

use crate::config::{SocketOptions, TlsOptions};
use crate::error::{Error, Result};

/// An established connection to the server.
pub enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Write the whole buffer.
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(s) => s.write_all(buf).await?,
            Self::Tls(s) => s.write_all(buf).await?,
            #[cfg(unix)]
            Self::Unix(s) => s.write_all(buf).await?,
        }
        Ok(())
    }

    /// Await the next inbound chunk. Returns the number of bytes appended to
    /// `buf`; zero means the peer closed.
    pub async fn read_chunk(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Self::Tcp(s) => s.read_buf(buf).await?,
            Self::Tls(s) => s.read_buf(buf).await?,
            #[cfg(unix)]
            Self::Unix(s) => s.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// One bounded passive read, used by the handshake.
    pub async fn recv_timeout(&mut self, buf: &mut BytesMut, timeout: Duration) -> Result<usize> {
        match tokio::time::timeout(timeout, self.read_chunk(buf)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "no reply within {timeout:?} during handshake"
            ))),
        }
    }

    /// Shut the socket down; errors at this point are of no interest.
    pub async fn close(mut self) {
        let _ = match &mut self {
            Self::Tcp(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown().await,
        };
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(_) => f.write_str("Transport::Tcp"),
            Self::Tls(_) => f.write_str("Transport::Tls"),
            #[cfg(unix)]
            Self::Unix(_) => f.write_str("Transport::Unix"),
        }
    }
}

// ── Dialing ────────────────────────────────────────────────────────

/// Dial the candidate list in order; first success wins.
///
/// Returns the last failure when every address fails.
pub async fn dial(
    addrs: &[SocketAddr],
    options: &SocketOptions,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let mut last_err =
        io::Error::new(io::ErrorKind::NotFound, "empty address candidate list");
    for addr in addrs {
        match dial_one(*addr, options, timeout).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

async fn dial_one(
    addr: SocketAddr,
    options: &SocketOptions,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()?
    } else {
        TcpSocket::new_v4()?
    };
    if options.keepalive {
        socket.set_keepalive(true)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }

    let stream = match tokio::time::timeout(timeout, socket.connect(addr)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out after {timeout:?}"),
            ));
        }
    };
    if options.nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(stream)
}

/// Connect to a unix-domain socket path.
#[cfg(unix)]
pub async fn dial_unix(path: &std::path::Path, timeout: Duration) -> io::Result<UnixStream> {
    match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {} timed out after {timeout:?}", path.display()),
        )),
    }
}

// ── TLS upgrade ────────────────────────────────────────────────────

/// Upgrade an already-connected plain socket to TLS.
///
/// Must run before any reads are issued on the socket; the bootstrap performs
/// it between dialing and the first handshake recv. Failure drops (and thereby
/// closes) the underlying socket.
pub async fn upgrade_tls(
    stream: TcpStream,
    host: &str,
    tls: &TlsOptions,
    timeout: Duration,
) -> Result<Transport> {
    let config = match &tls.config {
        Some(config) => config.clone(),
        None => default_client_config(),
    };
    let name = tls.server_name.clone().unwrap_or_else(|| host.to_string());
    let server_name = ServerName::try_from(name)
        .map_err(|e| Error::FailedToUpgradeToTls(format!("invalid server name: {e}")))?;

    let connector = TlsConnector::from(config);
    match tokio::time::timeout(timeout, connector.connect(server_name, stream)).await {
        Ok(Ok(tls_stream)) => Ok(Transport::Tls(Box::new(tls_stream))),
        Ok(Err(e)) => Err(Error::FailedToUpgradeToTls(e.to_string())),
        Err(_) => Err(Error::FailedToUpgradeToTls(format!(
            "handshake timed out after {timeout:?}"
        ))),
    }
}

fn default_client_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

// ── Tests ──────────────────────────────────────────────────────────
