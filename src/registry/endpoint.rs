use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::NetworkError;

/// Address and port of a reachable node or gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    pub fn new(
        ip: IpAddr,
        port: u16,
    ) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Every address `target` (`host:port` or `ip:port`) resolves to, with
    /// the lookup bounded by `within`.
    pub async fn resolve(
        target: &str,
        within: Duration,
    ) -> Result<Vec<Endpoint>, NetworkError> {
        if let Ok(endpoint) = target.parse::<Endpoint>() {
            return Ok(vec![endpoint]);
        }

        let addrs = timeout(within, lookup_host(target.trim()))
            .await
            .map_err(|_| NetworkError::Resolve {
                target: target.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("lookup exceeded {within:?}"),
                ),
            })?
            .map_err(|source| NetworkError::Resolve {
                target: target.to_string(),
                source,
            })?;

        let mut endpoints: Vec<Endpoint> = addrs.map(Endpoint).collect();
        endpoints.dedup();
        debug!(%target, resolved = ?endpoints, "resolved host");
        Ok(endpoints)
    }
}

/// Resolves each of `targets` in order, skipping those that fail.
///
/// Fails with [`NetworkError::NoCandidates`] when nothing resolves.
pub async fn resolve_all(
    targets: &[String],
    within: Duration,
) -> Result<Vec<Endpoint>, NetworkError> {
    let mut endpoints = Vec::new();
    for target in targets {
        match Endpoint::resolve(target, within).await {
            Ok(resolved) => endpoints.extend(resolved),
            Err(e) => warn!(%target, error = %e, "skipping unresolvable address"),
        }
    }
    if endpoints.is_empty() {
        return Err(NetworkError::NoCandidates);
    }
    Ok(endpoints)
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| NetworkError::InvalidEndpoint(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_and_port() {
        let endpoint: Endpoint = " 127.0.0.1:7001 ".parse().unwrap();
        assert_eq!(endpoint.port(), 7001);
        assert!("localhost:7001".parse::<Endpoint>().is_err());
    }

    #[tokio::test]
    async fn resolves_literal_address_without_lookup() {
        let endpoints = Endpoint::resolve("10.0.0.5:7001", Duration::from_millis(1)).await.unwrap();
        assert_eq!(endpoints, vec!["10.0.0.5:7001".parse().unwrap()]);
    }

    #[tokio::test]
    async fn resolves_localhost_to_loopback() {
        let endpoints = Endpoint::resolve("localhost:7001", Duration::from_secs(2)).await.unwrap();
        assert!(!endpoints.is_empty());
        assert!(endpoints.iter().all(|e| e.ip().is_loopback() && e.port() == 7001));
    }

    #[tokio::test]
    async fn missing_port_fails_to_resolve() {
        let result = Endpoint::resolve("localhost", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(NetworkError::Resolve { .. })));
    }

    #[tokio::test]
    async fn resolve_all_skips_bad_entries() {
        let targets = vec!["localhost".to_string(), "127.0.0.1:7002".to_string()];
        let endpoints = resolve_all(&targets, Duration::from_secs(2)).await.unwrap();
        assert_eq!(endpoints, vec!["127.0.0.1:7002".parse().unwrap()]);

        let nothing = resolve_all(&["localhost".to_string()], Duration::from_secs(2)).await;
        assert!(matches!(nothing, Err(NetworkError::NoCandidates)));
    }
}
