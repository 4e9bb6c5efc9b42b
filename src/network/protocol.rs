//! Messages exchanged between clients, gateways and members.
//!
//! Every message travels in its own frame: a 4 byte big-endian length followed
//! by the bincode encoding of [`Message`]. A connection starts with the
//! connecting side sending [`Message::Hello`]; the listener answers with
//! [`Message::Welcome`] or [`Message::Reject`]. Afterwards the connecting side
//! issues requests and the listener answers each one in order.

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

use crate::constants::PROTOCOL_MAGIC;
use crate::constants::PROTOCOL_VERSION;
use crate::Endpoint;
use crate::Member;
use crate::NodeId;

/// Who is on the connecting side of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// External client using the node as a gateway
    Client { client_id: String },
    /// Existing member (probes, gossip, departure notices)
    Member { node_id: NodeId },
    /// Node asking to be admitted into the cluster
    Joiner {
        node_id: NodeId,
        endpoint: Endpoint,
        incarnation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Hello {
        magic: u32,
        version: u16,
        role: PeerRole,
    },
    Welcome {
        node_id: NodeId,
        generation: u64,
        members: Vec<Member>,
    },
    Reject {
        reason: String,
    },
    ListMembers {
        only_active: bool,
    },
    Members {
        generation: u64,
        members: Vec<Member>,
    },
    Ping {
        from: NodeId,
        generation: u64,
    },
    Ack {
        from: NodeId,
        generation: u64,
    },
    Gossip {
        from: NodeId,
        members: Vec<Member>,
    },
    GossipAck {
        generation: u64,
    },
    Leave {
        node_id: NodeId,
    },
}

/// Content of the `Welcome` that completed an outbound handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub node_id: NodeId,
    pub generation: u64,
    pub members: Vec<Member>,
}

impl Message {
    pub fn hello(role: PeerRole) -> Self {
        Message::Hello {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            role,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "Hello",
            Message::Welcome { .. } => "Welcome",
            Message::Reject { .. } => "Reject",
            Message::ListMembers { .. } => "ListMembers",
            Message::Members { .. } => "Members",
            Message::Ping { .. } => "Ping",
            Message::Ack { .. } => "Ack",
            Message::Gossip { .. } => "Gossip",
            Message::GossipAck { .. } => "GossipAck",
            Message::Leave { .. } => "Leave",
        }
    }

    pub fn encode(&self) -> Result<Bytes, bincode::Error> {
        bincode::serialize(self).map(Bytes::from)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(frame)
    }
}

pub(crate) fn frame_codec(max_frame_size: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_size)
        .new_codec()
}

/// Checks the fixed fields of a `Hello`.
pub(crate) fn check_hello(
    magic: u32,
    version: u16,
) -> Result<(), String> {
    if magic != PROTOCOL_MAGIC {
        return Err(format!("bad magic {magic:#010x}"));
    }
    if version != PROTOCOL_VERSION {
        return Err(format!(
            "unsupported protocol version {version}, expected {PROTOCOL_VERSION}"
        ));
    }
    Ok(())
}
