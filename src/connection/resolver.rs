//! Hostname resolution.
//!
//! Turns the configured host into an ordered candidate list for the dialer:
//! IP literals pass through untouched, names resolve with IPv6 candidates
//! ahead of IPv4, and duplicates are removed in place so the fallback order
//! matches name-service order. Unix-domain paths bypass resolution entirely.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use tokio::net::lookup_host;

use crate::config::ServerHost;
use crate::error::{Error, Result};

/// A resolved dial target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// TCP candidates, in fallback order.
    Tcp(Vec<SocketAddr>),
    /// A single local (unix-domain) address.
    Unix(PathBuf),
}

/// Resolve a configured host to a dial target.
pub async fn resolve(host: &ServerHost, port: u16) -> Result<Target> {
    match host {
        ServerHost::Unix(path) => Ok(Target::Unix(path.clone())),
        ServerHost::Name(name) => resolve_name(name, port).await.map(Target::Tcp),
    }
}

/// Resolve a name or IP literal to an ordered, de-duplicated address list.
pub async fn resolve_name(name: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let found: Vec<SocketAddr> = lookup_host((name, port))
        .await
        .map_err(Error::ConnectionError)?
        .collect();

    // v6 first, then v4, each keeping discovery order.
    let mut ordered: Vec<SocketAddr> = found
        .iter()
        .filter(|a| a.is_ipv6())
        .chain(found.iter().filter(|a| a.is_ipv4()))
        .copied()
        .collect();
    let mut seen = HashSet::new();
    ordered.retain(|a| seen.insert(*a));

    if ordered.is_empty() {
        return Err(Error::ConnectionError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses found for {name}"),
        )));
    }
    Ok(ordered)
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ipv4_literal_passes_through() {
        let addrs = resolve_name("192.0.2.7", 6379).await.unwrap();
        assert_eq!(addrs, vec!["192.0.2.7:6379".parse().unwrap()]);
    }

    #[tokio::test]
    async fn ipv6_literal_passes_through() {
        let addrs = resolve_name("::1", 6380).await.unwrap();
        assert_eq!(addrs, vec!["[::1]:6380".parse().unwrap()]);
    }

    #[tokio::test]
    async fn localhost_resolves_to_loopback() {
        let addrs = resolve_name("localhost", 6379).await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.ip().is_loopback()));
        assert!(addrs.iter().all(|a| a.port() == 6379));
        // No duplicates, v6 (if any) strictly before v4.
        let first_v4 = addrs.iter().position(|a| a.is_ipv4());
        let last_v6 = addrs.iter().rposition(|a| a.is_ipv6());
        if let (Some(v4), Some(v6)) = (first_v4, last_v6) {
            assert!(v6 < v4);
        }
        let unique: HashSet<_> = addrs.iter().collect();
        assert_eq!(unique.len(), addrs.len());
    }

    #[tokio::test]
    async fn unix_path_is_passthrough() {
        let target = resolve(&ServerHost::Unix("/tmp/redis.sock".into()), 6379)
            .await
            .unwrap();
        assert_eq!(target, Target::Unix("/tmp/redis.sock".into()));
    }

    #[tokio::test]
    async fn unresolvable_name_errors() {
        let result = resolve_name("definitely-not-a-real-host.invalid", 6379).await;
        assert!(matches!(result, Err(Error::ConnectionError(_))));
    }
}
