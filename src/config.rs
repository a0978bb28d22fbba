//! Connection configuration and URL parsing.
//!
//! Supported URL schemes:
//! - `redis://[user:pass@]host[:port][/db]`
//! - `rediss://[user:pass@]host[:port][/db]`                     — TLS
//! - `redis+sentinel://master@host[:port][,host[:port]…][/db]`  — sentinel

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default Redis Sentinel port.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;
/// Default reconnect cooldown.
pub const DEFAULT_RECONNECT_SLEEP: Duration = Duration::from_millis(100);
/// Default connect / handshake-recv timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Where the server lives: a resolvable name / IP literal, or a unix-domain
/// socket path (port ignored).
#[derive(Debug, Clone, PartialEq)]
pub enum ServerHost {
    Name(String),
    Unix(PathBuf),
}

/// TCP options applied at dial time, merged over defaults.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Disable Nagle. On by default.
    pub nodelay: bool,
    pub keepalive: bool,
    pub recv_buffer_size: Option<u32>,
    pub send_buffer_size: Option<u32>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: false,
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

/// TLS parameters for the post-dial upgrade.
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Certificate name to verify; defaults to the configured host.
    pub server_name: Option<String>,
    /// Custom client config; `None` uses the webpki root store.
    pub config: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("server_name", &self.server_name)
            .field("config", &self.config.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Sentinel configuration: which master group to ask for, and the monitor
/// endpoints to ask, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SentinelOptions {
    pub master_group: String,
    pub endpoints: Vec<(String, u16)>,
}

/// What the subscriber does when its push queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBehaviour {
    /// Discard the incoming message and count it for a later `Dropped` notice.
    #[default]
    Drop,
    /// Terminate the subscription client.
    Exit,
}

/// Everything a client or subscriber needs to reach a server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: ServerHost,
    /// Ignored for unix-domain hosts.
    pub port: u16,
    /// Database index; 0 skips the SELECT handshake step.
    pub database: u32,
    pub credentials: Credentials,
    /// Reconnect cooldown; `None` disables reconnecting entirely.
    pub reconnect: Option<Duration>,
    pub connect_timeout: Duration,
    /// Bound on each handshake read.
    pub recv_timeout: Duration,
    pub socket_options: SocketOptions,
    /// `Some` enables the TLS upgrade after dialing.
    pub tls: Option<TlsOptions>,
    /// `Some` resolves the master via sentinel before each connect.
    pub sentinel: Option<SentinelOptions>,
    /// Label for the driver's tracing span.
    pub name: Option<String>,
    /// Subscriber only: bound on the push queue; `None` is unbounded.
    pub max_queue_size: Option<usize>,
    /// Subscriber only: overflow policy.
    pub queue_behaviour: QueueBehaviour,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: ServerHost::Name("localhost".into()),
            port: DEFAULT_PORT,
            database: 0,
            credentials: Credentials::default(),
            reconnect: Some(DEFAULT_RECONNECT_SLEEP),
            connect_timeout: DEFAULT_TIMEOUT,
            recv_timeout: DEFAULT_TIMEOUT,
            socket_options: SocketOptions::default(),
            tls: None,
            sentinel: None,
            name: None,
            max_queue_size: None,
            queue_behaviour: QueueBehaviour::default(),
        }
    }
}

impl ConnectOptions {
    /// Options for a TCP server at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: ServerHost::Name(host.into()),
            port,
            ..Self::default()
        }
    }

    /// Options for a unix-domain socket path.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self {
            host: ServerHost::Unix(path.into()),
            port: 0,
            ..Self::default()
        }
    }

    /// Parse a `redis://`, `rediss://` or `redis+sentinel://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut options = Self::default();

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| Error::Protocol(format!("invalid URL, missing ://: {url}")))?;

        match scheme {
            "redis" => {}
            "rediss" => options.tls = Some(TlsOptions::default()),
            "redis+sentinel" => return parse_sentinel_url(options, rest),
            _ => return Err(Error::Protocol(format!("unknown URL scheme: {scheme}"))),
        }

        parse_standalone_url(&mut options, rest)?;
        Ok(options)
    }
}

// ── URL helpers ────────────────────────────────────────────────────

/// Split `host-part[/db]` at the last slash.
fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.rsplit_once('/') {
        Some((head, db)) if !db.is_empty() => (head, Some(db)),
        Some((head, _)) => (head, None),
        None => (rest, None),
    }
}

fn parse_db(options: &mut ConnectOptions, db: Option<&str>) -> Result<()> {
    if let Some(db) = db {
        options.database = db
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid db index: {db}")))?;
    }
    Ok(())
}

/// `user:pass` or `:pass` or bare `pass` before the `@`.
fn parse_userinfo(options: &mut ConnectOptions, userinfo: &str) -> Result<()> {
    let (user, pass) = match userinfo.split_once(':') {
        Some((user, pass)) => (user, pass),
        None => ("", userinfo),
    };
    if pass.is_empty() {
        return Err(Error::Protocol("URL userinfo has no password".into()));
    }
    let username = (!user.is_empty()).then(|| user.into());
    options.credentials = Credentials::new(username, Some(pass.into()));
    Ok(())
}

/// `host[:port]`, IPv6 literals in brackets.
fn parse_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::Protocol(format!("unclosed IPv6 bracket: {addr}")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| Error::Protocol(format!("invalid port: {p}")))?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::Protocol(format!("invalid port: {port}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}

fn parse_standalone_url(options: &mut ConnectOptions, rest: &str) -> Result<()> {
    let (host_part, db) = split_path(rest);
    parse_db(options, db)?;

    let host_port = match host_part.rsplit_once('@') {
        Some((userinfo, hp)) => {
            parse_userinfo(options, userinfo)?;
            hp
        }
        None => host_part,
    };
    if host_port.is_empty() {
        return Err(Error::Protocol("URL has no host".into()));
    }
    let (host, port) = parse_host_port(host_port, DEFAULT_PORT)?;
    options.host = ServerHost::Name(host);
    options.port = port;
    Ok(())
}

/// `[user:pass@]master@host[:port][,host[:port]…]`
fn parse_sentinel_url(mut options: ConnectOptions, rest: &str) -> Result<ConnectOptions> {
    let (host_part, db) = split_path(rest);
    parse_db(&mut options, db)?;

    let at_count = host_part.chars().filter(|&c| c == '@').count();
    let (master_group, endpoint_list) = match at_count {
        0 => {
            return Err(Error::Protocol(
                "sentinel URL must name the master group: redis+sentinel://master@host".into(),
            ));
        }
        1 => host_part.split_once('@').unwrap_or((host_part, "")),
        _ => {
            // First `@` ends the credentials, second ends the master group.
            let (userinfo, tail) = host_part.split_once('@').unwrap_or((host_part, ""));
            parse_userinfo(&mut options, userinfo)?;
            tail.split_once('@').ok_or_else(|| {
                Error::Protocol("sentinel URL must name the master group after credentials".into())
            })?
        }
    };
    if master_group.is_empty() {
        return Err(Error::Protocol("empty sentinel master group".into()));
    }

    let mut endpoints = Vec::new();
    for addr in endpoint_list.split(',') {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        endpoints.push(parse_host_port(addr, DEFAULT_SENTINEL_PORT)?);
    }
    if endpoints.is_empty() {
        return Err(Error::Protocol(
            "sentinel URL must list at least one endpoint".into(),
        ));
    }

    options.host = ServerHost::Name(endpoints[0].0.clone());
    options.port = endpoints[0].1;
    options.sentinel = Some(SentinelOptions {
        master_group: master_group.to_string(),
        endpoints,
    });
    Ok(options)
}

// ── Tests ──────────────────────────────────────────────────────────
