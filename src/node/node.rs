//! A running cluster member.
//!
//! ## Example Usage
//! ```ignore
//! let node = NodeBuilder::from_settings(settings, shutdown_rx).start().await?;
//! println!("members: {:?}", node.list_members());
//! node.run().await?; // until the shutdown signal, then leaves the cluster
//! ```

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::Connector;
use crate::Endpoint;
use crate::EndpointRegistry;
use crate::Member;
use crate::MemberInfo;
use crate::MemberStatus;
use crate::Membership;
use crate::MembershipService;
use crate::MembershipView;
use crate::Message;
use crate::NodeId;
use crate::PeerRole;
use crate::Result;
use crate::Settings;

pub struct Node {
    pub(super) local: MemberInfo,
    pub(super) settings: Arc<Settings>,
    pub(super) membership: Arc<MembershipService>,
    pub(super) registry: Arc<EndpointRegistry>,
    pub(super) connector: Connector,
    pub(super) shutdown_signal: watch::Receiver<()>,
    pub(super) stop_tx: watch::Sender<()>,
    pub(super) handles: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn id(&self) -> &NodeId {
        &self.local.id
    }

    /// Address peers and clients use to reach this node.
    pub fn endpoint(&self) -> Endpoint {
        self.local.endpoint
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn membership(&self) -> Arc<MembershipService> {
        self.membership.clone()
    }

    /// Endpoints of the active members, kept in sync with the view.
    pub fn registry(&self) -> Arc<EndpointRegistry> {
        self.registry.clone()
    }

    /// Latest local view; never waits on membership changes in flight.
    pub fn snapshot(&self) -> Arc<MembershipView> {
        self.membership.snapshot()
    }

    /// Every known member ordered by id, departed ones included.
    pub fn list_members(&self) -> Vec<Member> {
        self.membership.list_members()
    }

    pub fn active_members(&self) -> Vec<Member> {
        self.membership.active_members()
    }

    /// Serves until the shutdown signal fires, then leaves the cluster.
    pub async fn run(mut self) -> Result<()> {
        if self.shutdown_signal.changed().await.is_err() {
            debug!("shutdown sender dropped");
        }
        info!(node_id = %self.local.id, "shutdown signal received");
        self.leave().await
    }

    /// Announces the departure to every live peer, then stops all tasks.
    ///
    /// Peers that cannot be told learn about it through gossip or declare
    /// this node left once it stays unreachable long enough.
    pub async fn leave(self) -> Result<()> {
        let id = self.local.id.clone();
        match self.membership.depart(id.clone()).await {
            Ok(view) => debug!(generation = view.generation(), "marked self as left"),
            Err(e) => warn!(error = %e, "could not record own departure"),
        }

        let peers: Vec<Endpoint> = self
            .snapshot()
            .peers()
            .filter(|m| matches!(m.status, MemberStatus::Active | MemberStatus::Unreachable))
            .map(|m| m.endpoint)
            .collect();
        let notices = peers
            .iter()
            .map(|peer| notify_departure(&self.connector, *peer, id.clone()));
        for (peer, result) in peers.iter().zip(join_all(notices).await) {
            if let Err(e) = result {
                debug!(%peer, error = %e, "departure notice not delivered");
            }
        }

        info!(node_id = %id, "Node left the cluster");
        self.stop().await;
        Ok(())
    }

    /// Stops every task without telling anyone, as a crash would.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let grace = self.settings.policy.response_timeout();
        for handle in self.handles {
            if timeout(grace, handle).await.is_err() {
                warn!("background task did not stop in time");
            }
        }
    }
}

async fn notify_departure(
    connector: &Connector,
    peer: Endpoint,
    node_id: NodeId,
) -> Result<()> {
    let role = PeerRole::Member {
        node_id: node_id.clone(),
    };
    let mut session = connector.open(peer, role).await?;
    session.request(&Message::Leave { node_id }).await?;
    let _ = session.close().await;
    Ok(())
}
