use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
#[cfg(test)]
use mockall::automock;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Membership;
use super::ProbeHealthMonitor;
use crate::metrics::PROBE_RESULTS;
use crate::time::millis_since;
use crate::Connector;
use crate::Endpoint;
use crate::Member;
use crate::MemberStatus;
use crate::Message;
use crate::NetworkError;
use crate::NodeId;
use crate::PeerRole;
use crate::Policy;
use crate::Result;

/// Checks whether a peer is alive.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PeerProber: Send + Sync + 'static {
    async fn probe(
        &self,
        target: Endpoint,
    ) -> Result<()>;
}

/// Probes by opening a member session and exchanging `Ping`/`Ack`.
pub struct SessionProber {
    connector: Connector,
    local_id: NodeId,
}

impl SessionProber {
    pub fn new(
        connector: Connector,
        local_id: NodeId,
    ) -> Self {
        Self { connector, local_id }
    }
}

#[async_trait]
impl PeerProber for SessionProber {
    async fn probe(
        &self,
        target: Endpoint,
    ) -> Result<()> {
        let role = PeerRole::Member {
            node_id: self.local_id.clone(),
        };
        let mut session = self.connector.open(target, role).await?;
        let reply = session
            .request(&Message::Ping {
                from: self.local_id.clone(),
                generation: 0,
            })
            .await?;
        let _ = session.close().await;

        match reply {
            Message::Ack { .. } => Ok(()),
            other => Err(NetworkError::UnexpectedMessage {
                peer: target,
                expected: "Ack",
                received: other.kind(),
            }
            .into()),
        }
    }
}

/// Periodic probe cycle driving the `Unreachable` and `Left` transitions.
pub struct LivenessMonitor<P: PeerProber, M: Membership> {
    prober: P,
    membership: Arc<M>,
    pub(crate) health: ProbeHealthMonitor,
    probe_interval: Duration,
    unreachable_to_left_ms: u64,
}

impl<P: PeerProber, M: Membership> LivenessMonitor<P, M> {
    pub fn new(
        prober: P,
        membership: Arc<M>,
        policy: &Policy,
    ) -> Self {
        Self {
            prober,
            membership,
            health: ProbeHealthMonitor::new(policy.max_missed_probes),
            probe_interval: policy.probe_interval(),
            unreachable_to_left_ms: policy.unreachable_to_left_in_ms,
        }
    }

    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately; give peers one interval to come up
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("liveness monitor received shutdown signal");
                    return Ok(());
                }
                _ = ticker.tick() => self.probe_round().await,
            }
        }
    }

    /// Probes every peer that is active or unreachable, concurrently.
    pub async fn probe_round(&self) {
        let view = self.membership.snapshot();
        let targets: Vec<Member> = view
            .peers()
            .filter(|m| matches!(m.status, MemberStatus::Active | MemberStatus::Unreachable))
            .cloned()
            .collect();
        // members that left or were dropped by any path stop counting
        let probed: HashSet<NodeId> = targets.iter().map(|m| m.id.clone()).collect();
        self.health.retain_only(&probed);
        if targets.is_empty() {
            return;
        }
        trace!(targets = targets.len(), "probe round");

        let probes = targets.iter().map(|m| self.prober.probe(m.endpoint));
        let results = join_all(probes).await;

        for (member, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    PROBE_RESULTS.with_label_values(&["ok"]).inc();
                    self.on_success(member).await;
                }
                Err(e) => {
                    PROBE_RESULTS.with_label_values(&["failed"]).inc();
                    debug!(node_id = %member.id, error = %e, "probe failed");
                    self.on_failure(member).await;
                }
            }
        }
    }

    async fn on_success(
        &self,
        member: &Member,
    ) {
        self.health.record_success(&member.id);
        if member.status == MemberStatus::Unreachable {
            info!(node_id = %member.id, "member reachable again");
            if let Err(e) = self.membership.mark_active(member.id.clone()).await {
                warn!(node_id = %member.id, error = %e, "could not mark member active");
            }
        }
    }

    async fn on_failure(
        &self,
        member: &Member,
    ) {
        let failures = self.health.record_failure(&member.id);
        match member.status {
            MemberStatus::Active if self.health.exceeds_budget(&member.id) => {
                warn!(node_id = %member.id, failures, "member unreachable");
                if let Err(e) = self.membership.mark_unreachable(member.id.clone()).await {
                    warn!(node_id = %member.id, error = %e, "could not mark member unreachable");
                }
            }
            MemberStatus::Unreachable
                if millis_since(member.last_observed_ms) >= self.unreachable_to_left_ms =>
            {
                warn!(node_id = %member.id, "member unreachable for too long, declaring it left");
                match self.membership.depart(member.id.clone()).await {
                    Ok(_) => self.health.forget(&member.id),
                    Err(e) => warn!(node_id = %member.id, error = %e, "could not declare member left"),
                }
            }
            _ => {}
        }
    }
}
