//! Known candidate addresses of gateways and members.
mod endpoint;
mod endpoint_registry;
pub use endpoint::*;
pub use endpoint_registry::*;
