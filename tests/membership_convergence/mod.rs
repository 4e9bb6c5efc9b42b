//! A member admitted at one node becomes visible at every node.

use d_cluster::ClusterClient;
use d_cluster::MemberStatus;

use crate::common::start_node;
use crate::common::test_settings;
use crate::common::wait_for_cluster_size;

#[tokio::test]
async fn test_new_member_is_seen_by_every_member() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let n2 = start_node("n2", vec![n1.addr()]).await;
    assert!(wait_for_cluster_size(&[&n1, &n2], 2).await);

    // joins through n2; n1 only hears about it through gossip
    let n3 = start_node("n3", vec![n2.addr()]).await;

    assert!(wait_for_cluster_size(&[&n1, &n2, &n3], 3).await);

    for n in [n3, n2, n1] {
        n.node.leave().await.unwrap();
    }
}

#[tokio::test]
async fn test_departed_member_is_reported_left_through_client() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let n2 = start_node("n2", vec![n1.addr()]).await;
    assert!(wait_for_cluster_size(&[&n1, &n2], 2).await);
    let n2_id = n2.node.id().clone();

    n2.node.leave().await.unwrap();

    let client = ClusterClient::connect(vec![n1.addr()], &test_settings("client"))
        .await
        .unwrap();
    let members = client.list_members(false).await.unwrap();
    let departed = members.iter().find(|m| m.id == n2_id).unwrap();
    assert_eq!(departed.status, MemberStatus::Left);
    assert_eq!(client.list_members(true).await.unwrap().len(), 1);

    n1.node.leave().await.unwrap();
}

#[tokio::test]
async fn test_run_leaves_cluster_on_shutdown_signal() {
    crate::enable_logger();
    let n1 = start_node("n1", vec![]).await;
    let n2 = start_node("n2", vec![n1.addr()]).await;
    assert!(wait_for_cluster_size(&[&n1, &n2], 2).await);

    let running = tokio::spawn(n2.node.run());
    n2.graceful_tx.send(()).unwrap();
    running.await.unwrap().unwrap();

    assert!(wait_for_cluster_size(&[&n1], 1).await);
    n1.node.leave().await.unwrap();
}
