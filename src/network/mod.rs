//! Network layer: bounded outbound connection attempts and the inbound
//! admission listener.
//!
//! Both sides speak the framed protocol from [`protocol`]. All timeouts come
//! from the [`Policy`](crate::Policy) handed in at construction.
mod connector;
mod listener;
mod protocol;
mod session;

pub use connector::*;
pub use listener::*;
pub use protocol::*;
pub use session::*;
