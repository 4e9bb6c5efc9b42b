//! Membership view, join admission and liveness.
//!
//! Each node owns a [`MembershipView`] mapping member id to liveness status.
//! Changes are applied by a single writer ([`MembershipService`]) and spread
//! to other members by the [`Gossiper`]; the [`LivenessMonitor`] probes peers
//! and drives the `Unreachable` and `Left` transitions.
mod gossip;
mod health_monitor;
mod member;
mod prober;
mod service;
mod view;
pub use gossip::*;
pub use health_monitor::*;
pub use member::*;
pub use prober::*;
pub use service::*;
pub use view::MembershipView;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Membership: Send + Sync + 'static {
    fn local_id(&self) -> NodeId;

    /// Latest locally known view. Never waits on pending changes.
    fn snapshot(&self) -> Arc<MembershipView>;

    /// Records a node whose join handshake succeeded and marks it active.
    async fn admit(
        &self,
        member: MemberInfo,
    ) -> Result<Arc<MembershipView>>;

    /// Folds entries received from another member into the local view.
    async fn merge(
        &self,
        members: Vec<Member>,
    ) -> Result<Arc<MembershipView>>;

    async fn mark_active(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>>;

    async fn mark_unreachable(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>>;

    async fn depart(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>>;
}
