use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::Endpoint;

const NODE_ID_LEN: usize = 12;

/// Unique identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identity for a node that was not given one.
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(NODE_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Liveness status of a member.
///
/// ```text
/// Joining -> Active <-> Unreachable
///              |            |
///              +--> Left <--+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Joining,
    Active,
    Unreachable,
    Left,
}

impl MemberStatus {
    /// Single-step edges of the state machine.
    pub fn can_transition_to(
        self,
        next: MemberStatus,
    ) -> bool {
        use MemberStatus::*;
        matches!(
            (self, next),
            (Joining, Active)
                | (Active, Unreachable)
                | (Unreachable, Active)
                | (Active, Left)
                | (Unreachable, Left)
        )
    }

    /// Whether `target` is reachable through one or more edges.
    ///
    /// Gossip may deliver a state several steps ahead of the local one.
    pub fn can_reach(
        self,
        target: MemberStatus,
    ) -> bool {
        use MemberStatus::*;
        match self {
            Joining => target != Joining,
            Active => matches!(target, Unreachable | Left),
            Unreachable => matches!(target, Active | Left),
            Left => false,
        }
    }

    /// Tie breaker for concurrent updates carrying the same version.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            MemberStatus::Joining => 0,
            MemberStatus::Active => 1,
            MemberStatus::Unreachable => 2,
            MemberStatus::Left => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == MemberStatus::Left
    }
}

/// What a node announces about itself when joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: NodeId,
    pub endpoint: Endpoint,
    /// Distinguishes successive runs of a node that keeps its id; a newer
    /// incarnation supersedes everything known about an older one
    pub incarnation: u64,
}

impl MemberInfo {
    pub fn new(
        id: NodeId,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            id,
            endpoint,
            incarnation: 0,
        }
    }

    pub fn with_incarnation(
        mut self,
        incarnation: u64,
    ) -> Self {
        self.incarnation = incarnation;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub status: MemberStatus,
    pub incarnation: u64,
    /// Bumped on every status change within one incarnation; orders
    /// concurrent updates during merge
    pub version: u64,
    /// Local time (ms since epoch) this observer last recorded a status for
    /// the member
    pub last_observed_ms: u64,
}

impl Member {
    pub(crate) fn new(
        info: MemberInfo,
        status: MemberStatus,
        now_ms: u64,
    ) -> Self {
        Self {
            id: info.id,
            endpoint: info.endpoint,
            status,
            incarnation: info.incarnation,
            version: 1,
            last_observed_ms: now_ms,
        }
    }

    pub fn info(&self) -> MemberInfo {
        MemberInfo::new(self.id.clone(), self.endpoint).with_incarnation(self.incarnation)
    }

    /// Whether `other` describes a later incarnation, or a later state of the
    /// same one.
    pub(crate) fn is_superseded_by(
        &self,
        other: &Member,
    ) -> bool {
        match other.incarnation.cmp(&self.incarnation) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                other.version > self.version
                    || (other.version == self.version
                        && other.status.precedence() > self.status.precedence())
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
