use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::NodeId;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Unique member identity; generated when not configured
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,

    /// Address the admission listener binds to. Port 0 picks an ephemeral port.
    #[serde(default = "default_listen_addr")]
    pub listen_address: SocketAddr,

    /// Address other members and clients use to reach this node. Required
    /// when `listen_address` is a wildcard; port 0 means the bound port.
    #[serde(default)]
    pub advertise_address: Option<SocketAddr>,

    /// Existing members contacted to join, as `host:port`. Host names are
    /// resolved when joining. Empty means this node bootstraps a new cluster.
    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_listen_addr(),
            advertise_address: None,
            seeds: vec![],
            log_dir: default_log_dir(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    /// # Errors
    /// Returns `Error::Config` if any configuration rule is violated
    pub fn validate(&self) -> Result<()> {
        if self.node_id.as_str().trim().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "node_id cannot be empty".into(),
            )));
        }

        match self.advertise_address {
            Some(advertise) if advertise.ip().is_unspecified() => {
                return Err(Error::Config(ConfigError::Message(format!(
                    "advertise_address {advertise} must be a routable address"
                ))));
            }
            None if self.listen_address.ip().is_unspecified() => {
                return Err(Error::Config(ConfigError::Message(format!(
                    "listen_address {} is a wildcard; set advertise_address",
                    self.listen_address
                ))));
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for seed in &self.seeds {
            let seed = seed.trim();
            let port = seed_port(seed).ok_or_else(|| {
                Error::Config(ConfigError::Message(format!(
                    "seed {seed:?} must be host:port"
                )))
            })?;
            if port == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "seed {seed} must specify a non-zero port"
                ))));
            }
            if !seen.insert(seed) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "duplicate seed {seed}"
                ))));
            }
            if let Ok(addr) = seed.parse::<SocketAddr>() {
                let own = [Some(self.listen_address), self.advertise_address];
                if own.iter().flatten().any(|a| a.port() != 0 && *a == addr) {
                    return Err(Error::Config(ConfigError::Message(format!(
                        "{seed} is this node's own address and cannot be its seed"
                    ))));
                }
            }
        }

        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "log_dir path cannot be empty".into(),
            )));
        }

        Ok(())
    }
}

/// Port of a `host:port` or `[v6]:port` seed; `None` when malformed.
fn seed_port(seed: &str) -> Option<u16> {
    let (host, port) = seed.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse().ok()
}

fn default_node_id() -> NodeId {
    NodeId::generate()
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9081))
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/d-cluster/logs")
}
