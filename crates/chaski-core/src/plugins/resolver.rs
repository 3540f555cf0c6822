//! Peer server naming
//!
//! Maps peer domains to relay targets and connecting IPs back to the names a
//! peer may send mail for.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;
use tracing::{debug, warn};

/// Resolves a connecting IP to the domain names it may speak for
#[async_trait]
pub trait PeerResolver: Send + Sync {
    async fn peer_names(&self, ip: IpAddr) -> Vec<String>;
}

/// Static `[peers]` table: domain -> `host[:port]`
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    entries: HashMap<String, String>,
}

impl PeerTable {
    pub fn new(entries: &HashMap<String, String>) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(domain, target)| (domain.to_ascii_lowercase(), target.trim().to_string()))
                .collect(),
        }
    }

    /// Relay target for `domain`, using `port` when none is configured
    pub fn target(&self, domain: &str, port: u16) -> String {
        match self.entries.get(&domain.to_ascii_lowercase()) {
            Some(entry) if has_port(entry) => entry.clone(),
            Some(entry) => format_target(entry, port),
            None => format_target(domain, port),
        }
    }

    /// Domains whose configured host is literally `ip`
    pub fn names_for_ip(&self, ip: IpAddr) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry_ip(entry) == Some(ip))
            .map(|(domain, _)| domain.clone())
            .collect();
        names.sort();
        names
    }
}

fn has_port(entry: &str) -> bool {
    if entry.parse::<SocketAddr>().is_ok() {
        return true;
    }
    matches!(entry.rsplit_once(':'), Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok())
}

fn format_target(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => SocketAddr::from((v6, port)).to_string(),
        _ => format!("{}:{}", host, port),
    }
}

fn entry_ip(entry: &str) -> Option<IpAddr> {
    entry
        .parse::<SocketAddr>()
        .map(|addr| addr.ip())
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok())
}

/// Answers from the static table only
#[async_trait]
impl PeerResolver for PeerTable {
    async fn peer_names(&self, ip: IpAddr) -> Vec<String> {
        let mut names = self.names_for_ip(ip);
        if ip.is_loopback() {
            names.push("localhost".to_string());
        }
        names
    }
}

/// Static table first, then reverse DNS
pub struct DnsPeerResolver {
    peers: PeerTable,
    resolver: TokioAsyncResolver,
}

impl DnsPeerResolver {
    pub fn new(peers: PeerTable) -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read system resolver configuration, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });

        Self { peers, resolver }
    }
}

#[async_trait]
impl PeerResolver for DnsPeerResolver {
    async fn peer_names(&self, ip: IpAddr) -> Vec<String> {
        let mut names = self.peers.peer_names(ip).await;

        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => {
                for ptr in lookup.iter() {
                    let name = ptr.to_string();
                    let name = name.trim_end_matches('.');
                    if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                        names.push(name.to_string());
                    }
                }
            }
            Err(e) => {
                debug!(ip = %ip, error = %e, "Reverse lookup failed");
            }
        }

        debug!(ip = %ip, names = ?names, "Resolved peer names");
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> PeerTable {
        let mut entries = HashMap::new();
        entries.insert("ServerB".to_string(), "127.0.0.1:1457".to_string());
        entries.insert("serverC".to_string(), "10.0.0.3".to_string());
        entries.insert("serverD".to_string(), "relay.example.org:5000".to_string());
        entries.insert("serverE".to_string(), "relay.example.org".to_string());
        PeerTable::new(&entries)
    }

    #[test]
    fn test_target() {
        let peers = table();
        assert_eq!(peers.target("serverB", 4567), "127.0.0.1:1457");
        assert_eq!(peers.target("serverC", 4567), "10.0.0.3:4567");
        assert_eq!(peers.target("serverD", 4567), "relay.example.org:5000");
        assert_eq!(peers.target("serverE", 4567), "relay.example.org:4567");
        assert_eq!(peers.target("unknown.org", 4568), "unknown.org:4568");
    }

    #[test]
    fn test_names_for_ip() {
        let peers = table();
        assert_eq!(peers.names_for_ip("127.0.0.1".parse().unwrap()), vec!["serverb"]);
        assert_eq!(peers.names_for_ip("10.0.0.3".parse().unwrap()), vec!["serverc"]);
        assert!(peers.names_for_ip("10.0.0.4".parse().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let peers = table();
        let names = peers.peer_names("127.0.0.1".parse().unwrap()).await;
        assert_eq!(names, vec!["serverb", "localhost"]);
        assert!(peers.peer_names("192.0.2.1".parse().unwrap()).await.is_empty());
    }
}
