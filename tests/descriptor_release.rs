//! Timed out connection attempts release their sockets.
//!
//! Runs as its own test binary so no other test opens descriptors while
//! they are counted.

use std::fs;
use std::time::Duration;

use d_cluster::ConnectError;
use d_cluster::Connector;
use d_cluster::Endpoint;
use d_cluster::PeerRole;
use d_cluster::Settings;
use tokio::net::TcpListener;
use tokio::time::Instant;

const ATTEMPTS: usize = 50;

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").map(|entries| entries.count()).unwrap_or(0)
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_repeated_timeouts_do_not_leak_descriptors() {
    let mut settings = Settings::default();
    settings.policy.open_connection_timeout_in_ms = 50;
    let connector = Connector::new(&settings.policy, &settings.network, settings.retry.gateway);

    // never accepts; the backlog completes the TCP connect
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled = Endpoint::from(listener.local_addr().unwrap());
    let role = PeerRole::Client {
        client_id: "fd-check".into(),
    };

    // warm up the runtime so its own descriptors are already open
    let _ = connector
        .connect(stalled, Instant::now() + Duration::from_millis(50), role.clone())
        .await;
    let before = open_descriptors();

    for _ in 0..ATTEMPTS {
        let result = connector.open(stalled, role.clone()).await;
        assert!(matches!(result, Err(ConnectError::Timeout { .. })));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = open_descriptors();
    assert!(
        after <= before + 2,
        "descriptors grew from {before} to {after} over {ATTEMPTS} timed out attempts"
    );
}
