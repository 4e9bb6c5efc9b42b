use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::Endpoint;

/// Ordered set of candidate endpoints.
///
/// Reads load an immutable snapshot and never block; writers swap in a new
/// list with `rcu`, so concurrent writers are serialized without a lock.
pub struct EndpointRegistry {
    endpoints: ArcSwap<Vec<Endpoint>>,
}

impl EndpointRegistry {
    pub fn new(initial: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        for endpoint in initial {
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        Self {
            endpoints: ArcSwap::from_pointee(endpoints),
        }
    }

    /// Point-in-time copy of the candidates in insertion order.
    pub fn candidates(&self) -> Vec<Endpoint> {
        Vec::clone(&self.endpoints.load())
    }

    /// Adds `endpoint` at the end; adding a known endpoint is a no-op.
    /// Returns whether the registry changed.
    pub fn add(
        &self,
        endpoint: Endpoint,
    ) -> bool {
        let mut added = false;
        self.endpoints.rcu(|current| {
            if current.contains(&endpoint) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = Vec::clone(current);
                next.push(endpoint);
                Arc::new(next)
            }
        });
        if added {
            debug!(%endpoint, "endpoint registered");
        }
        added
    }

    /// Returns whether the registry changed.
    pub fn remove(
        &self,
        endpoint: &Endpoint,
    ) -> bool {
        let mut removed = false;
        self.endpoints.rcu(|current| {
            if current.contains(endpoint) {
                removed = true;
                Arc::new(current.iter().filter(|e| *e != endpoint).copied().collect())
            } else {
                removed = false;
                Arc::clone(current)
            }
        });
        if removed {
            debug!(%endpoint, "endpoint unregistered");
        }
        removed
    }

    pub fn contains(
        &self,
        endpoint: &Endpoint,
    ) -> bool {
        self.endpoints.load().contains(endpoint)
    }

    pub fn len(&self) -> usize {
        self.endpoints.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.load().is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
