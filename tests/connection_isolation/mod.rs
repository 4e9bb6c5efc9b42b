//! Connection attempts are bounded by their own deadline and do not wait on
//! one another.

use std::time::Duration;

use d_cluster::ConnectError;
use d_cluster::Connector;
use d_cluster::Endpoint;
use d_cluster::EndpointRegistry;
use d_cluster::PeerRole;
use futures::future::join_all;
use tokio::time::Instant;

use crate::common::stalled_endpoint;
use crate::common::stalled_socket;
use crate::common::start_node;
use crate::common::test_settings;
use crate::common::OPEN_CONNECTION_TIMEOUT_IN_MS;
use crate::common::SLACK_IN_MS;

fn client_role() -> PeerRole {
    PeerRole::Client {
        client_id: "isolation".into(),
    }
}

fn connector() -> Connector {
    let settings = test_settings("client");
    Connector::new(&settings.policy, &settings.network, settings.retry.gateway)
}

#[tokio::test]
async fn test_unresponsive_peer_times_out_within_deadline() {
    crate::enable_logger();
    let (_listener, stalled) = stalled_endpoint().await;
    let timeout = Duration::from_millis(OPEN_CONNECTION_TIMEOUT_IN_MS);

    let started = Instant::now();
    let result = connector().connect(stalled, started + timeout, client_role()).await;

    assert!(matches!(result, Err(ConnectError::Timeout { .. })));
    assert!(started.elapsed() <= timeout + Duration::from_millis(SLACK_IN_MS));
}

#[tokio::test]
async fn test_stalled_attempt_does_not_delay_unrelated_connect() {
    crate::enable_logger();
    let (_listener, stalled) = stalled_endpoint().await;
    let n1 = start_node("n1", vec![]).await;
    let connector = connector();

    let stalled_attempt = tokio::spawn({
        let connector = connector.clone();
        async move { connector.open(stalled, client_role()).await.map(|_| ()) }
    });

    let started = Instant::now();
    let session = connector.open(n1.node.endpoint(), client_role()).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(OPEN_CONNECTION_TIMEOUT_IN_MS));
    assert_eq!(session.peer(), n1.node.endpoint());

    assert!(matches!(stalled_attempt.await.unwrap(), Err(ConnectError::Timeout { .. })));
    n1.node.leave().await.unwrap();
}

#[tokio::test]
async fn test_gateway_walk_moves_past_stalled_endpoint() {
    crate::enable_logger();
    let (_listener, stalled) = stalled_endpoint().await;
    let n1 = start_node("n1", vec![]).await;
    let registry = EndpointRegistry::new([stalled, n1.node.endpoint()]);

    let started = Instant::now();
    let session = connector().connect_any(&registry, client_role()).await.unwrap();

    assert_eq!(session.peer(), n1.node.endpoint());
    assert!(
        started.elapsed()
            <= Duration::from_millis(2 * OPEN_CONNECTION_TIMEOUT_IN_MS + SLACK_IN_MS)
    );
    n1.node.leave().await.unwrap();
}

#[tokio::test]
async fn test_listener_completes_handshakes_while_stalled_sockets_are_held() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let mut stalled = Vec::new();
    for _ in 0..16 {
        stalled.push(stalled_socket(n1.addr()).await);
    }

    let connector = connector();
    let endpoint: Endpoint = n1.node.endpoint();
    let started = Instant::now();
    let sessions = join_all((0..8).map(|_| connector.open(endpoint, client_role()))).await;

    assert!(sessions.iter().all(|s| s.is_ok()));
    assert!(started.elapsed() < Duration::from_millis(OPEN_CONNECTION_TIMEOUT_IN_MS));
    drop(stalled);
    n1.node.leave().await.unwrap();
}
