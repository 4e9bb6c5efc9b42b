//! A stalled socket against a member must not get in the way of clients
//! reconnecting or of new members joining.

use std::time::Duration;

use d_cluster::ClusterClient;
use tokio::time::Instant;

use crate::common::start_node;
use crate::common::stalled_socket;
use crate::common::test_settings;
use crate::common::wait_for_cluster_size;
use crate::common::OPEN_CONNECTION_TIMEOUT_IN_MS;

#[tokio::test]
async fn test_client_reconnects_while_stalled_socket_is_held() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let settings = test_settings("client");

    let client = ClusterClient::connect(vec![n1.addr()], &settings).await.unwrap();
    assert_eq!(client.list_members(true).await.unwrap().len(), 1);

    client.close().await.unwrap();
    let _stalled = stalled_socket(n1.addr()).await;

    let started = Instant::now();
    client.reconnect().await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(OPEN_CONNECTION_TIMEOUT_IN_MS),
        "reconnect took {:?}",
        started.elapsed()
    );
    assert_eq!(client.list_members(true).await.unwrap().len(), 1);

    n1.node.leave().await.unwrap();
}

#[tokio::test]
async fn test_node_joins_while_stalled_socket_is_held() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let _stalled = stalled_socket(n1.addr()).await;

    let n2 = start_node("n2", vec![n1.addr()]).await;

    assert!(wait_for_cluster_size(&[&n1, &n2], 2).await);

    n2.node.leave().await.unwrap();
    n1.node.leave().await.unwrap();
}
