//! Cluster membership and connection admission.
//!
//! Nodes join through seed members, keep a converging [`MembershipView`]
//! through gossip and probing, and admit inbound connections without letting
//! a stalled socket hold back anyone else. External users reach the cluster
//! through a [`ClusterClient`], which walks its gateways with a bounded
//! per-attempt connect timeout.
mod client;
mod config;
mod constants;
mod errors;
mod membership;
pub mod metrics;
mod network;
mod node;
mod registry;
pub mod utils;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use membership::*;
pub use network::*;
pub use node::*;
pub use registry::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
