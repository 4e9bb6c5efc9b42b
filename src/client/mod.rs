//! Gateway client for external users of the cluster.
//!
//! A [`ClusterClient`] holds one session with a gateway member and falls
//! back to the next registered gateway when the current one stops
//! answering.
//!
//! ```ignore
//! let client = ClusterClient::connect(vec!["127.0.0.1:9081".parse()?], &settings).await?;
//! for member in client.list_members(true).await? {
//!     println!("{} {} {:?}", member.id, member.endpoint, member.status);
//! }
//! ```

mod client;

pub use client::*;
