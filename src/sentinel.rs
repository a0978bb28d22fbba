//! Sentinel master resolution.
//!
//! Asks each configured monitor endpoint, in order, which address currently
//! serves the master group. The first usable answer wins; dial failures,
//! timeouts, error replies and "unknown group" null replies all advance to
//! the next endpoint. Runs fresh on every bootstrap attempt so a failover is
//! re-discovered on reconnect; nothing is cached here.
//!
//! Sentinel traffic is plain TCP, unauthenticated and unencrypted.

use std::time::Duration;
use tracing::debug;

use crate::config::{SentinelOptions, SocketOptions};
use crate::connection::bootstrap::Connection;
use crate::connection::resolver;
use crate::connection::transport::{self, Transport};
use crate::error::{Error, Result};
use crate::resp::writer::encode_command;
use crate::resp::Value;

/// Resolve the current master endpoint for the configured group.
pub async fn resolve_master(
    options: &SentinelOptions,
    timeout: Duration,
) -> Result<(String, u16)> {
    for (host, port) in &options.endpoints {
        match query_endpoint(host, *port, &options.master_group, timeout).await {
            Ok(master) => return Ok(master),
            Err(e) => {
                debug!(endpoint = %format!("{host}:{port}"), error = %e, "sentinel query failed");
            }
        }
    }
    Err(Error::NoMaster)
}

/// Ask one monitor for the master address.
async fn query_endpoint(
    host: &str,
    port: u16,
    master_group: &str,
    timeout: Duration,
) -> Result<(String, u16)> {
    let addrs = resolver::resolve_name(host, port).await?;
    let stream = transport::dial(&addrs, &SocketOptions::default(), timeout)
        .await
        .map_err(Error::ConnectionError)?;
    let mut conn = Connection::new(Transport::Tcp(stream));

    let query = encode_command(&[
        b"SENTINEL",
        b"get-master-addr-by-name",
        master_group.as_bytes(),
    ]);
    conn.send(&query).await?;
    let reply = conn.read_value_timeout(timeout).await?;
    conn.close().await;

    parse_master_reply(reply, master_group)
}

/// Extract `{host, port}` from the 2-element bulk-string array reply.
fn parse_master_reply(reply: Value, master_group: &str) -> Result<(String, u16)> {
    match reply {
        Value::Array(items) if items.len() == 2 => {
            let host = items[0]
                .as_str()
                .ok_or_else(|| Error::Protocol("sentinel master host is not a string".into()))?
                .to_string();
            let port = items[1]
                .as_str()
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or_else(|| Error::Protocol("sentinel master port is not a port".into()))?;
            Ok((host, port))
        }
        Value::NilArray | Value::Nil => Err(Error::Protocol(format!(
            "sentinel does not monitor group '{master_group}'"
        ))),
        Value::Error(msg) => Err(Error::Redis(msg)),
        other => Err(Error::Protocol(format!(
            "unexpected sentinel reply: {}",
            other.type_name()
        ))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn mock_sentinel(response: Vec<u8>) -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 512];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&response).await.unwrap();
        });
        (addr.ip().to_string(), addr.port())
    }

    fn dead_endpoint() -> (String, u16) {
        // Bind-then-drop leaves a port that refuses connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        (addr.ip().to_string(), addr.port())
    }

    fn sentinel_options(endpoints: Vec<(String, u16)>) -> SentinelOptions {
        SentinelOptions {
            master_group: "mymaster".into(),
            endpoints,
        }
    }

    #[tokio::test]
    async fn first_endpoint_answers() {
        let ep = mock_sentinel(b"*2\r\n$9\r\n127.0.0.1\r\n$4\r\n6380\r\n".to_vec()).await;
        let master = resolve_master(&sentinel_options(vec![ep]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(master, ("127.0.0.1".into(), 6380));
    }

    #[tokio::test]
    async fn refused_endpoint_falls_through_to_next() {
        let dead = dead_endpoint();
        let good = mock_sentinel(b"*2\r\n$9\r\n127.0.0.1\r\n$4\r\n6380\r\n".to_vec()).await;
        let master = resolve_master(&sentinel_options(vec![dead, good]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(master, ("127.0.0.1".into(), 6380));
    }

    #[tokio::test]
    async fn unknown_group_falls_through() {
        let nil = mock_sentinel(b"*-1\r\n".to_vec()).await;
        let good = mock_sentinel(b"*2\r\n$8\r\n10.0.0.9\r\n$4\r\n6379\r\n".to_vec()).await;
        let master = resolve_master(&sentinel_options(vec![nil, good]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(master, ("10.0.0.9".into(), 6379));
    }

    #[tokio::test]
    async fn error_reply_falls_through() {
        let err = mock_sentinel(b"-ERR unknown command\r\n".to_vec()).await;
        let good = mock_sentinel(b"*2\r\n$9\r\n127.0.0.1\r\n$4\r\n6381\r\n".to_vec()).await;
        let master = resolve_master(&sentinel_options(vec![err, good]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(master, ("127.0.0.1".into(), 6381));
    }

    #[tokio::test]
    async fn all_endpoints_exhausted_is_no_master() {
        let dead1 = dead_endpoint();
        let dead2 = dead_endpoint();
        let result =
            resolve_master(&sentinel_options(vec![dead1, dead2]), Duration::from_millis(300)).await;
        assert!(matches!(result, Err(Error::NoMaster)));
    }

    #[test]
    fn master_reply_parsing() {
        let ok = Value::Array(vec![
            Value::BulkString(Bytes::from_static(b"10.1.2.3")),
            Value::BulkString(Bytes::from_static(b"6390")),
        ]);
        assert_eq!(
            parse_master_reply(ok, "m").unwrap(),
            ("10.1.2.3".into(), 6390)
        );

        let bad_port = Value::Array(vec![
            Value::BulkString(Bytes::from_static(b"10.1.2.3")),
            Value::BulkString(Bytes::from_static(b"not-a-port")),
        ]);
        assert!(parse_master_reply(bad_port, "m").is_err());

        assert!(parse_master_reply(Value::NilArray, "m").is_err());
        assert!(parse_master_reply(Value::Error("ERR x".into()), "m").is_err());
        assert!(parse_master_reply(Value::Integer(1), "m").is_err());
        assert!(parse_master_reply(Value::Array(vec![Value::Nil]), "m").is_err());
    }
}
