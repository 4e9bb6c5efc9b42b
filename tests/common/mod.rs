use std::net::SocketAddr;
use std::time::Duration;

use d_cluster::BackoffPolicy;
use d_cluster::Endpoint;
use d_cluster::Node;
use d_cluster::NodeBuilder;
use d_cluster::NodeId;
use d_cluster::Settings;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tokio::time::Instant;
use tracing::debug;

/// Polling granularity when waiting for a cluster to settle.
pub const POLL_INTERVAL_IN_MS: u64 = 500;

pub const OPEN_CONNECTION_TIMEOUT_IN_MS: u64 = 1_000;

/// Scheduling slack allowed on top of a configured timeout.
pub const SLACK_IN_MS: u64 = 500;

pub fn test_settings(node_id: &str) -> Settings {
    let mut settings = Settings::default();
    settings.cluster.node_id = NodeId::from(node_id);
    settings.cluster.listen_address = "127.0.0.1:0".parse().unwrap();
    settings.policy.open_connection_timeout_in_ms = OPEN_CONNECTION_TIMEOUT_IN_MS;
    settings.policy.response_timeout_in_ms = 1_000;
    settings.policy.handshake_timeout_in_ms = 1_000;
    settings.policy.probe_interval_in_ms = 200;
    settings.policy.max_missed_probes = 2;
    settings.policy.gossip_interval_in_ms = 200;
    settings.policy.unreachable_to_left_in_ms = 2_000;
    settings.policy.liveness_stabilization_time_in_ms = 4_000;
    settings.retry.gateway = BackoffPolicy {
        max_retries: 0,
        base_delay_ms: 50,
        max_delay_ms: 50,
    };
    settings.retry.join = BackoffPolicy {
        max_retries: 1,
        base_delay_ms: 50,
        max_delay_ms: 200,
    };
    settings
}

/// Started node plus the sender of its shutdown signal.
pub struct TestNode {
    pub node: Node,
    pub graceful_tx: watch::Sender<()>,
}

impl TestNode {
    pub fn addr(&self) -> SocketAddr {
        self.node.endpoint().socket_addr()
    }
}

pub async fn start_node(
    node_id: &str,
    seeds: Vec<SocketAddr>,
) -> TestNode {
    let (graceful_tx, graceful_rx) = watch::channel(());
    let node = NodeBuilder::from_settings(test_settings(node_id), graceful_rx)
        .seeds(seeds)
        .start()
        .await
        .unwrap_or_else(|e| panic!("node {node_id} failed to start: {e:?}"));
    TestNode { node, graceful_tx }
}

/// Polls every node until each reports `expected` active members, bounded by
/// the liveness stabilization time.
pub async fn wait_for_cluster_size(
    nodes: &[&TestNode],
    expected: usize,
) -> bool {
    let Some(first) = nodes.first() else {
        return expected == 0;
    };
    let deadline = Instant::now() + first.node.settings().policy.liveness_stabilization_time();
    loop {
        let sizes: Vec<usize> = nodes.iter().map(|n| n.node.active_members().len()).collect();
        debug!(?sizes, expected, "polling cluster size");
        if sizes.iter().all(|size| *size == expected) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        time::sleep(Duration::from_millis(POLL_INTERVAL_IN_MS)).await;
    }
}

/// Listener that never accepts: connects complete through the backlog but
/// no handshake ever answers.
pub async fn stalled_endpoint() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());
    (listener, endpoint)
}

/// Opens a TCP connection to `addr` and never writes to it.
pub async fn stalled_socket(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}
