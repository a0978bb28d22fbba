//! Connection bootstrap: resolve → dial → TLS upgrade → AUTH → SELECT.
//!
//! [`establish`] runs the whole ladder and hands back a [`Connection`] ready
//! for steady-state use. Every step failure maps to its own error variant so
//! callers can tell a dial failure from a rejected password.

use bytes::BytesMut;
use std::time::Duration;
use tracing::debug;

use crate::config::{ConnectOptions, ServerHost};
use crate::connection::resolver::{self, Target};
use crate::connection::transport::{self, Transport};
use crate::error::{Error, Result};
use crate::resp::writer::encode_inline;
use crate::resp::{Decoder, Value};
use crate::sentinel;

/// An established, authenticated connection: the transport plus the parser
/// continuation and a read scratch buffer. Exclusively owned by one driver.
#[derive(Debug)]
pub struct Connection {
    transport: Transport,
    decoder: Decoder,
    scratch: BytesMut,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            decoder: Decoder::new(),
            scratch: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Write one pre-encoded request (or pipeline of requests).
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.transport.send(buf).await
    }

    /// Await one inbound chunk and feed it to the decoder.
    ///
    /// Cancellation-safe: the chunk is only consumed after the read resolves.
    pub async fn recv(&mut self) -> Result<()> {
        self.scratch.clear();
        let n = self.transport.read_chunk(&mut self.scratch).await?;
        if n == 0 {
            return Err(Error::Closed);
        }
        self.decoder.feed(&self.scratch);
        Ok(())
    }

    /// Drain the next already-buffered value, if any.
    pub fn try_next_value(&mut self) -> Result<Option<Value>> {
        self.decoder.try_next()
    }

    /// Passive read loop used during the handshake: block (bounded) until one
    /// complete value is available.
    pub async fn read_value_timeout(&mut self, timeout: Duration) -> Result<Value> {
        loop {
            if let Some(value) = self.decoder.try_next()? {
                return Ok(value);
            }
            self.scratch.clear();
            let n = self
                .transport
                .recv_timeout(&mut self.scratch, timeout)
                .await?;
            if n == 0 {
                return Err(Error::Closed);
            }
            self.decoder.feed(&self.scratch);
        }
    }

    pub async fn close(self) {
        self.transport.close().await;
    }
}

/// Resolve, dial, upgrade and authenticate per the configured options.
pub async fn establish(options: &ConnectOptions) -> Result<Connection> {
    let transport = open_transport(options).await?;
    let mut conn = Connection::new(transport);

    if let Some(auth) = options.credentials.auth_command() {
        debug!("authenticating");
        if let Err(e) = send_expect_ok(&mut conn, &auth, options.recv_timeout).await {
            conn.close().await;
            return Err(Error::AuthenticationError(e.to_string()));
        }
    }

    if options.database != 0 {
        debug!(database = options.database, "selecting database");
        let select = encode_inline(&format!("SELECT {}", options.database));
        if let Err(e) = send_expect_ok(&mut conn, &select, options.recv_timeout).await {
            conn.close().await;
            return Err(Error::SelectError(e.to_string()));
        }
    }

    Ok(conn)
}

/// Steps 1–4: sentinel resolution, address resolution, dial with fallback,
/// optional TLS upgrade.
async fn open_transport(options: &ConnectOptions) -> Result<Transport> {
    // Sentinel, when configured, supersedes the static host/port.
    let (host, port) = match &options.sentinel {
        Some(sentinel_options) => {
            let (host, port) =
                sentinel::resolve_master(sentinel_options, options.connect_timeout).await?;
            debug!(host = %host, port, "sentinel named master");
            (ServerHost::Name(host), port)
        }
        None => (options.host.clone(), options.port),
    };

    match resolver::resolve(&host, port).await? {
        Target::Tcp(addrs) => {
            let stream = transport::dial(&addrs, &options.socket_options, options.connect_timeout)
                .await
                .map_err(Error::ConnectionError)?;
            match (&options.tls, &host) {
                (Some(tls), ServerHost::Name(name)) => {
                    transport::upgrade_tls(stream, name, tls, options.connect_timeout).await
                }
                _ => Ok(Transport::Tcp(stream)),
            }
        }
        Target::Unix(path) => connect_unix(&path, options).await,
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path, options: &ConnectOptions) -> Result<Transport> {
    let stream = transport::dial_unix(path, options.connect_timeout)
        .await
        .map_err(Error::ConnectionError)?;
    Ok(Transport::Unix(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path, _options: &ConnectOptions) -> Result<Transport> {
    Err(Error::Protocol(
        "unix-domain sockets are not supported on this platform".into(),
    ))
}

/// Send one handshake request and require a `+OK` reply.
async fn send_expect_ok(conn: &mut Connection, request: &[u8], timeout: Duration) -> Result<()> {
    conn.send(request).await?;
    match conn.read_value_timeout(timeout).await? {
        Value::SimpleString(s) if s == "OK" => Ok(()),
        Value::Error(msg) => Err(Error::Redis(msg)),
        other => Err(Error::UnexpectedResponse(
            format!("{other:?}").into_bytes().into(),
        )),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
