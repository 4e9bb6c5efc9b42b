/// First field of every `Hello`; anything else talking to our port is not a
/// cluster peer.
pub(crate) const PROTOCOL_MAGIC: u32 = 0xD0C1_A5E7;

pub(crate) const PROTOCOL_VERSION: u16 = 1;

/// How long a listener spends telling a misbehaving peer why it is dropped.
pub(crate) const REJECT_SEND_TIMEOUT_IN_MS: u64 = 200;

/// Pause after a failed `accept`, e.g. when the process is out of descriptors.
pub(crate) const ACCEPT_ERROR_BACKOFF_IN_MS: u64 = 50;
