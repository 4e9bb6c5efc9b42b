use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Socket level parameters shared by outbound attempts and the admission
/// listener.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Disable Nagle on every session socket
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// Largest accepted frame in bytes; larger frames are a protocol violation
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Handshakes the listener runs concurrently. Sockets arriving while
    /// every slot is taken are dropped instead of queued.
    #[serde(default = "default_max_inflight_handshakes")]
    pub max_inflight_handshakes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: default_tcp_nodelay(),
            max_frame_size: default_max_frame_size(),
            max_inflight_handshakes: default_max_inflight_handshakes(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < 1024 {
            return Err(Error::Config(ConfigError::Message(format!(
                "max_frame_size {} too small, minimum 1024 bytes",
                self.max_frame_size
            ))));
        }

        if self.max_inflight_handshakes == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_inflight_handshakes must be > 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_tcp_nodelay() -> bool {
    true
}
fn default_max_frame_size() -> usize {
    4 * 1024 * 1024
}
fn default_max_inflight_handshakes() -> usize {
    1024
}
