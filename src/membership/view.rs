use std::collections::BTreeMap;

use tracing::warn;

use crate::Member;
use crate::MemberInfo;
use crate::MemberStatus;
use crate::MembershipError;
use crate::NodeId;

/// A change submitted to the membership writer.
#[derive(Debug, Clone)]
pub(crate) enum ViewChange {
    /// Handshake with a joining node succeeded
    Admit(MemberInfo),
    Activate(NodeId),
    MarkUnreachable(NodeId),
    /// Explicit departure or expired unreachability
    Depart(NodeId),
    /// Entries received from another member
    Merge(Vec<Member>),
    /// Forget departed members not heard about for `retention_ms`
    ExpireDeparted { retention_ms: u64 },
}

/// Immutable, versioned snapshot of the cluster as seen by one member.
///
/// A new snapshot is produced for every applied change, with the generation
/// incremented by one. Snapshots of one observer therefore never go back in
/// generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    owner: NodeId,
    generation: u64,
    members: BTreeMap<NodeId, Member>,
}

impl MembershipView {
    /// View of the first node of a new cluster; the owner is active at once.
    pub fn bootstrap(
        owner: MemberInfo,
        now_ms: u64,
    ) -> Self {
        Self::with_owner(owner, MemberStatus::Active, now_ms)
    }

    /// View of a node that still has to be admitted by an existing member.
    pub fn joining(
        owner: MemberInfo,
        now_ms: u64,
    ) -> Self {
        Self::with_owner(owner, MemberStatus::Joining, now_ms)
    }

    fn with_owner(
        owner: MemberInfo,
        status: MemberStatus,
        now_ms: u64,
    ) -> Self {
        let id = owner.id.clone();
        let mut members = BTreeMap::new();
        members.insert(id.clone(), Member::new(owner, status, now_ms));
        Self {
            owner: id,
            generation: 1,
            members,
        }
    }

    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(
        &self,
        id: &NodeId,
    ) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn contains(
        &self,
        id: &NodeId,
    ) -> bool {
        self.members.contains_key(id)
    }

    /// Status of the owner in its own view.
    pub fn local_status(&self) -> Option<MemberStatus> {
        self.members.get(&self.owner).map(|m| m.status)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every known member, ordered by id.
    pub fn list_members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn active_members(&self) -> Vec<Member> {
        self.members.values().filter(|m| m.is_active()).cloned().collect()
    }

    /// Members other than the owner.
    pub fn peers(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(move |m| m.id != self.owner)
    }

    /// Applies `change` and returns the next snapshot, or `None` when the
    /// change leaves the view as it is.
    pub(crate) fn apply(
        &self,
        change: &ViewChange,
        now_ms: u64,
    ) -> Result<Option<MembershipView>, MembershipError> {
        let mut next = self.clone();
        let changed = match change {
            ViewChange::Admit(info) => next.admit(info, now_ms)?,
            ViewChange::Activate(id) => next.set_status(id, MemberStatus::Active, now_ms)?,
            ViewChange::MarkUnreachable(id) => {
                if *id == self.owner {
                    return Err(MembershipError::InvalidTransition {
                        node_id: id.clone(),
                        from: self.local_status().unwrap_or(MemberStatus::Active),
                        to: MemberStatus::Unreachable,
                    });
                }
                next.set_status(id, MemberStatus::Unreachable, now_ms)?
            }
            ViewChange::Depart(id) => next.set_status(id, MemberStatus::Left, now_ms)?,
            ViewChange::Merge(remote) => next.merge(remote, now_ms),
            ViewChange::ExpireDeparted { retention_ms } => next.expire_departed(*retention_ms, now_ms),
        };

        if changed {
            next.generation = self.generation + 1;
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }

    fn admit(
        &mut self,
        info: &MemberInfo,
        now_ms: u64,
    ) -> Result<bool, MembershipError> {
        let Some(known) = self.members.get(&info.id) else {
            self.members.insert(
                info.id.clone(),
                Member::new(info.clone(), MemberStatus::Joining, now_ms),
            );
            return Ok(true);
        };
        let (status, incarnation) = (known.status, known.incarnation);

        if info.incarnation > incarnation {
            // restarted under the same id; the old run is gone whatever we
            // last heard about it
            self.members.insert(
                info.id.clone(),
                Member::new(info.clone(), MemberStatus::Joining, now_ms),
            );
            return Ok(true);
        }
        if info.incarnation < incarnation {
            return Err(MembershipError::StaleIncarnation {
                node_id: info.id.clone(),
                incarnation: info.incarnation,
                current: incarnation,
            });
        }

        match status {
            MemberStatus::Left => Err(MembershipError::AlreadyLeft {
                node_id: info.id.clone(),
            }),
            // a completed handshake proves the member is alive again
            MemberStatus::Unreachable => self.set_status(&info.id, MemberStatus::Active, now_ms),
            MemberStatus::Joining | MemberStatus::Active => Ok(false),
        }
    }

    fn set_status(
        &mut self,
        id: &NodeId,
        to: MemberStatus,
        now_ms: u64,
    ) -> Result<bool, MembershipError> {
        let member = self
            .members
            .get_mut(id)
            .ok_or_else(|| MembershipError::NoMemberFound { node_id: id.clone() })?;

        if member.status == to {
            return Ok(false);
        }
        if !member.status.can_transition_to(to) {
            return Err(MembershipError::InvalidTransition {
                node_id: id.clone(),
                from: member.status,
                to,
            });
        }

        member.status = to;
        member.version += 1;
        member.last_observed_ms = now_ms;
        Ok(true)
    }

    fn merge(
        &mut self,
        remote: &[Member],
        now_ms: u64,
    ) -> bool {
        let mut changed = false;
        for member in remote {
            changed |= if member.id == self.owner {
                self.merge_self(member, now_ms)
            } else {
                self.merge_peer(member, now_ms)
            };
        }
        changed
    }

    fn merge_peer(
        &mut self,
        remote: &Member,
        now_ms: u64,
    ) -> bool {
        let Some(local) = self.members.get_mut(&remote.id) else {
            // a departure of a member we never knew leaves nothing to update
            if remote.status.is_terminal() {
                return false;
            }
            let mut member = remote.clone();
            member.last_observed_ms = now_ms;
            self.members.insert(member.id.clone(), member);
            return true;
        };

        if !local.is_superseded_by(remote) {
            return false;
        }

        if remote.incarnation > local.incarnation {
            *local = remote.clone();
            local.last_observed_ms = now_ms;
            return true;
        }

        if remote.status != local.status {
            if !local.status.can_reach(remote.status) {
                return false;
            }
            local.status = remote.status;
            local.last_observed_ms = now_ms;
        }
        local.version = remote.version;
        local.endpoint = remote.endpoint;
        true
    }

    /// Reconciles what others believe about the owner.
    fn merge_self(
        &mut self,
        remote: &Member,
        now_ms: u64,
    ) -> bool {
        let Some(local) = self.members.get_mut(&self.owner) else {
            return false;
        };
        // rumours about another run of this node
        if remote.incarnation != local.incarnation {
            return false;
        }

        match (local.status, remote.status) {
            // admitted by the member we joined through
            (MemberStatus::Joining, MemberStatus::Active) => {
                local.status = MemberStatus::Active;
                local.version = local.version.max(remote.version);
                local.last_observed_ms = now_ms;
                true
            }
            // refute a suspicion: we are evidently alive
            (MemberStatus::Active, MemberStatus::Unreachable) if remote.version >= local.version => {
                local.version = remote.version + 1;
                local.last_observed_ms = now_ms;
                true
            }
            // declared left while still running: come back as a new incarnation
            (MemberStatus::Active, MemberStatus::Left) => {
                let incarnation = now_ms.max(local.incarnation + 1);
                warn!(
                    node_id = %self.owner,
                    old_incarnation = local.incarnation,
                    incarnation,
                    "peers declared this node left, rejoining under a new incarnation"
                );
                local.incarnation = incarnation;
                local.version = 1;
                local.last_observed_ms = now_ms;
                true
            }
            (l, r) if l == r && remote.version > local.version => {
                local.version = remote.version;
                true
            }
            _ => false,
        }
    }

    /// Drops departed peers last observed at least `retention_ms` ago.
    fn expire_departed(
        &mut self,
        retention_ms: u64,
        now_ms: u64,
    ) -> bool {
        let before = self.members.len();
        let owner = self.owner.clone();
        self.members.retain(|id, m| {
            *id == owner
                || m.status != MemberStatus::Left
                || now_ms.saturating_sub(m.last_observed_ms) < retention_ms
        });
        self.members.len() != before
    }
}
