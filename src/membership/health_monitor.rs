use std::collections::HashSet;

use dashmap::DashMap;

use crate::NodeId;

/// Consecutive probe failures per member.
pub struct ProbeHealthMonitor {
    pub(crate) failure_counts: DashMap<NodeId, u32>,
    pub(crate) unreachable_threshold: u32,
}

impl ProbeHealthMonitor {
    pub fn new(unreachable_threshold: u32) -> Self {
        ProbeHealthMonitor {
            failure_counts: DashMap::new(),
            unreachable_threshold,
        }
    }

    /// Returns the number of consecutive failures including this one.
    pub fn record_failure(
        &self,
        node_id: &NodeId,
    ) -> u32 {
        let mut count = self.failure_counts.entry(node_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(
        &self,
        node_id: &NodeId,
    ) {
        self.failure_counts.remove(node_id); // Reset failure counter
    }

    /// Whether `node_id` has exhausted its retry budget.
    pub fn exceeds_budget(
        &self,
        node_id: &NodeId,
    ) -> bool {
        self.failure_counts
            .get(node_id)
            .map(|count| *count >= self.unreachable_threshold)
            .unwrap_or(false)
    }

    /// Drops counters of members that are no longer probed.
    pub fn forget(
        &self,
        node_id: &NodeId,
    ) {
        self.failure_counts.remove(node_id);
    }

    /// Keeps only the counters of `probed` members.
    pub fn retain_only(
        &self,
        probed: &HashSet<NodeId>,
    ) {
        self.failure_counts.retain(|id, _| probed.contains(id));
    }
}
