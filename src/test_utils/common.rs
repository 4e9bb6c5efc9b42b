use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::Instant;

use crate::time::timestamp_millis;
use crate::AdmissionListener;
use crate::BackoffPolicy;
use crate::Connector;
use crate::Endpoint;
use crate::MemberInfo;
use crate::MembershipService;
use crate::MembershipView;
use crate::NodeId;
use crate::Settings;

/// Departed members outlive any unit test.
pub(crate) const TEST_LEFT_RETENTION: Duration = Duration::from_secs(60);

/// Settings with timeouts short enough for unit tests.
pub(crate) fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.cluster.listen_address = "127.0.0.1:0".parse().unwrap();
    settings.policy.open_connection_timeout_in_ms = 500;
    settings.policy.response_timeout_in_ms = 500;
    settings.policy.handshake_timeout_in_ms = 300;
    settings.policy.probe_interval_in_ms = 100;
    settings.policy.max_missed_probes = 2;
    settings.policy.gossip_interval_in_ms = 100;
    settings.policy.unreachable_to_left_in_ms = 1_000;
    settings.policy.liveness_stabilization_time_in_ms = 2_000;
    settings.policy.left_retention_in_ms = 60_000;
    settings.retry.gateway = no_retry();
    settings.retry.join = no_retry();
    settings
}

pub(crate) fn no_retry() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        base_delay_ms: 10,
        max_delay_ms: 10,
    }
}

pub(crate) fn test_connector(settings: &Settings) -> Connector {
    Connector::new(&settings.policy, &settings.network, settings.retry.gateway)
}

pub(crate) fn member_info(
    id: &str,
    port: u16,
) -> MemberInfo {
    MemberInfo::new(NodeId::from(id), Endpoint::new([127, 0, 0, 1].into(), port))
}

/// Membership writer for a single node cluster owned by `id`.
///
/// Keep the returned sender alive for as long as the writer should run.
pub(crate) fn bootstrap_membership(
    id: &str,
    port: u16,
) -> (Arc<MembershipService>, watch::Sender<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let local = member_info(id, port);
    let view = MembershipView::bootstrap(local.clone(), timestamp_millis());
    let (service, _handle) = MembershipService::start(local, view, TEST_LEFT_RETENTION, shutdown_rx);
    (Arc::new(service), shutdown_tx)
}

/// Single node cluster `id` serving on an ephemeral loopback port.
pub(crate) struct TestGateway {
    pub endpoint: Endpoint,
    pub membership: Arc<MembershipService>,
    pub shutdown: watch::Sender<()>,
}

pub(crate) async fn spawn_gateway(
    id: &str,
    settings: &Settings,
) -> TestGateway {
    let (shutdown, shutdown_rx) = watch::channel(());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = member_info(id, listener.local_addr().unwrap().port());

    let view = MembershipView::bootstrap(local.clone(), timestamp_millis());
    let (service, _handle) = MembershipService::start(
        local.clone(),
        view,
        settings.policy.left_retention(),
        shutdown_rx.clone(),
    );
    let membership = Arc::new(service);

    let admission =
        AdmissionListener::from_listener(listener, settings, membership.clone()).unwrap();
    tokio::spawn(admission.run(shutdown_rx));

    TestGateway {
        endpoint: local.endpoint,
        membership,
        shutdown,
    }
}

/// Polls `condition` every 20ms until it holds or `within` elapses.
pub(crate) async fn eventually(
    within: Duration,
    mut condition: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
