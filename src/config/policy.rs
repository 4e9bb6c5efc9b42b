use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Cluster size assumed when deriving the default stabilization bound
const DEFAULT_CLUSTER_SIZE_HINT: usize = 8;

/// Timeout and liveness policy shared by every component of a node or client.
///
/// Built once at startup and injected into the components that need it. Nothing
/// mutates it afterwards.
///
/// `open_connection_timeout_in_ms` bounds the whole outbound handshake: TCP
/// connect plus the `Hello`/`Welcome` exchange. `response_timeout_in_ms` bounds
/// each request/response exchange on an established session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Policy {
    #[serde(default = "default_open_connection_timeout_in_ms")]
    pub open_connection_timeout_in_ms: u64,

    #[serde(default = "default_response_timeout_in_ms")]
    pub response_timeout_in_ms: u64,

    /// Time an accepted socket has to complete its handshake
    #[serde(default = "default_open_connection_timeout_in_ms")]
    pub handshake_timeout_in_ms: u64,

    #[serde(default = "default_probe_interval_in_ms")]
    pub probe_interval_in_ms: u64,

    /// Consecutive failed probes before a member is marked unreachable
    #[serde(default = "default_max_missed_probes")]
    pub max_missed_probes: u32,

    #[serde(default = "default_gossip_interval_in_ms")]
    pub gossip_interval_in_ms: u64,

    /// How long a member may stay unreachable before it is declared left
    #[serde(default = "default_unreachable_to_left_in_ms")]
    pub unreachable_to_left_in_ms: u64,

    /// Maximum delay before a membership change is visible in every view
    #[serde(default = "default_liveness_stabilization_time_in_ms")]
    pub liveness_stabilization_time_in_ms: u64,

    /// How long a departed member is remembered before it is dropped from
    /// the view. Must outlast stabilization so every view sees the departure.
    #[serde(default = "default_left_retention_in_ms")]
    pub left_retention_in_ms: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            open_connection_timeout_in_ms: default_open_connection_timeout_in_ms(),
            response_timeout_in_ms: default_response_timeout_in_ms(),
            handshake_timeout_in_ms: default_open_connection_timeout_in_ms(),
            probe_interval_in_ms: default_probe_interval_in_ms(),
            max_missed_probes: default_max_missed_probes(),
            gossip_interval_in_ms: default_gossip_interval_in_ms(),
            unreachable_to_left_in_ms: default_unreachable_to_left_in_ms(),
            liveness_stabilization_time_in_ms: default_liveness_stabilization_time_in_ms(),
            left_retention_in_ms: default_left_retention_in_ms(),
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("open_connection_timeout_in_ms", self.open_connection_timeout_in_ms),
            ("response_timeout_in_ms", self.response_timeout_in_ms),
            ("handshake_timeout_in_ms", self.handshake_timeout_in_ms),
            ("probe_interval_in_ms", self.probe_interval_in_ms),
            ("gossip_interval_in_ms", self.gossip_interval_in_ms),
            ("unreachable_to_left_in_ms", self.unreachable_to_left_in_ms),
            (
                "liveness_stabilization_time_in_ms",
                self.liveness_stabilization_time_in_ms,
            ),
            ("left_retention_in_ms", self.left_retention_in_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "policy.{name} must be > 0"
                ))));
            }
        }

        if self.max_missed_probes == 0 {
            return Err(Error::Config(ConfigError::Message(
                "policy.max_missed_probes must be > 0".into(),
            )));
        }

        // A change is pushed at least once per gossip interval; a shorter
        // bound could never be met.
        if self.liveness_stabilization_time_in_ms <= self.gossip_interval_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "policy.liveness_stabilization_time_in_ms {} must exceed gossip interval {}",
                self.liveness_stabilization_time_in_ms, self.gossip_interval_in_ms
            ))));
        }

        if self.left_retention_in_ms <= self.liveness_stabilization_time_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "policy.left_retention_in_ms {} must exceed stabilization time {}",
                self.left_retention_in_ms, self.liveness_stabilization_time_in_ms
            ))));
        }

        Ok(())
    }

    pub fn open_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.open_connection_timeout_in_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_in_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_in_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_in_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_in_ms)
    }

    pub fn unreachable_to_left(&self) -> Duration {
        Duration::from_millis(self.unreachable_to_left_in_ms)
    }

    pub fn liveness_stabilization_time(&self) -> Duration {
        Duration::from_millis(self.liveness_stabilization_time_in_ms)
    }

    pub fn left_retention(&self) -> Duration {
        Duration::from_millis(self.left_retention_in_ms)
    }

    /// Stabilization bound implied by the probe and gossip cadence for a
    /// cluster of `cluster_size` members.
    ///
    /// Epidemic push reaches every member in about log2(n) rounds; one more
    /// round covers a push that raced the change. Detection of a failed
    /// member costs `max_missed_probes` probe periods, and a single push may
    /// take up to one open-connection timeout against a stalled peer.
    pub fn derive_liveness_stabilization_time(
        &self,
        cluster_size: usize,
    ) -> Duration {
        Duration::from_millis(derive_stabilization_in_ms(
            cluster_size,
            self.gossip_interval_in_ms,
            self.probe_interval_in_ms,
            self.max_missed_probes,
            self.open_connection_timeout_in_ms,
        ))
    }
}

fn derive_stabilization_in_ms(
    cluster_size: usize,
    gossip_interval_in_ms: u64,
    probe_interval_in_ms: u64,
    max_missed_probes: u32,
    open_connection_timeout_in_ms: u64,
) -> u64 {
    let size = cluster_size.max(2);
    let rounds = (usize::BITS - (size - 1).leading_zeros()) as u64;
    gossip_interval_in_ms * (rounds + 1)
        + probe_interval_in_ms * max_missed_probes as u64
        + open_connection_timeout_in_ms
}

fn default_open_connection_timeout_in_ms() -> u64 {
    5_000
}
fn default_response_timeout_in_ms() -> u64 {
    3_000
}
fn default_probe_interval_in_ms() -> u64 {
    1_000
}
fn default_max_missed_probes() -> u32 {
    3
}
fn default_gossip_interval_in_ms() -> u64 {
    1_000
}
fn default_unreachable_to_left_in_ms() -> u64 {
    30_000
}
fn default_left_retention_in_ms() -> u64 {
    3 * default_unreachable_to_left_in_ms()
}
fn default_liveness_stabilization_time_in_ms() -> u64 {
    derive_stabilization_in_ms(
        DEFAULT_CLUSTER_SIZE_HINT,
        default_gossip_interval_in_ms(),
        default_probe_interval_in_ms(),
        default_max_missed_probes(),
        default_open_connection_timeout_in_ms(),
    )
}
