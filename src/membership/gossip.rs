use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::Membership;
use crate::Connector;
use crate::Endpoint;
use crate::Member;
use crate::Message;
use crate::NetworkError;
use crate::NodeId;
use crate::PeerRole;
use crate::Result;

/// Pushes the local view to every live peer.
///
/// A push goes out as soon as a new generation is published and again on
/// every tick, so a peer that missed one push catches up within an interval.
/// Each push runs on its own task; a stalled peer only delays its own push.
pub struct Gossiper<M: Membership> {
    connector: Connector,
    membership: Arc<M>,
    gossip_interval: Duration,
    in_flight: Arc<DashSet<Endpoint>>,
}

impl<M: Membership> Gossiper<M> {
    pub fn new(
        connector: Connector,
        membership: Arc<M>,
        gossip_interval: Duration,
    ) -> Self {
        Self {
            connector,
            membership,
            gossip_interval,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub async fn run(
        self,
        mut generations: watch::Receiver<u64>,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(self.gossip_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("gossiper received shutdown signal");
                    return Ok(());
                }
                changed = generations.changed() => {
                    if changed.is_err() {
                        debug!("membership writer gone, gossiper stopping");
                        return Ok(());
                    }
                    self.push_round();
                }
                _ = ticker.tick() => self.push_round(),
            }
        }
    }

    /// Starts one push per live peer that has none in flight.
    pub fn push_round(&self) {
        let view = self.membership.snapshot();
        let local_id = self.membership.local_id();
        let members = view.list_members();

        for peer in view.peers().filter(|m| is_gossip_target(m)) {
            let target = peer.endpoint;
            if !self.in_flight.insert(target) {
                trace!(%target, "push still in flight, skipping");
                continue;
            }

            let connector = self.connector.clone();
            let in_flight = self.in_flight.clone();
            let local_id = local_id.clone();
            let members = members.clone();
            tokio::spawn(async move {
                if let Err(e) = push(&connector, target, local_id, members).await {
                    debug!(%target, error = %e, "gossip push failed");
                }
                in_flight.remove(&target);
            });
        }
    }
}

/// Unreachable peers are included so a wrongly suspected member learns of
/// the suspicion and can refute it.
fn is_gossip_target(member: &Member) -> bool {
    !member.status.is_terminal()
}

async fn push(
    connector: &Connector,
    target: Endpoint,
    from: NodeId,
    members: Vec<Member>,
) -> Result<()> {
    let role = PeerRole::Member {
        node_id: from.clone(),
    };
    let mut session = connector.open(target, role).await?;
    let reply = session.request(&Message::Gossip { from, members }).await?;
    let _ = session.close().await;

    match reply {
        Message::GossipAck { generation } => {
            trace!(%target, generation, "gossip acknowledged");
            Ok(())
        }
        other => Err(NetworkError::UnexpectedMessage {
            peer: target,
            expected: "GossipAck",
            received: other.kind(),
        }
        .into()),
    }
}
