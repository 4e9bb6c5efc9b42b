//! A builder for starting a cluster [`Node`].
//!
//! [`NodeBuilder::start`] binds the admission listener, creates the local
//! membership view, joins the cluster through the configured seeds (or
//! bootstraps a new cluster when there are none) and spawns the background
//! tasks: membership writer, admission listener, liveness monitor, gossiper
//! and the registry sync.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::new(Some("config/n2.toml"), shutdown_rx)?
//!     .seeds(vec!["n1.cluster.local:9081"])
//!     .start()
//!     .await?;
//! node.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Node;
use crate::async_task::spawn_task;
use crate::net::advertised_addr;
use crate::resolve_all;
use crate::time::timestamp_millis;
use crate::AdmissionListener;
use crate::Connector;
use crate::Endpoint;
use crate::EndpointRegistry;
use crate::Gossiper;
use crate::LivenessMonitor;
use crate::MemberInfo;
use crate::MemberStatus;
use crate::Membership;
use crate::MembershipError;
use crate::MembershipService;
use crate::MembershipView;
use crate::NetworkError;
use crate::NodeId;
use crate::PeerRole;
use crate::Result;
use crate::SessionProber;
use crate::Settings;
use crate::SystemError;

pub struct NodeBuilder {
    settings: Settings,
    shutdown_signal: watch::Receiver<()>,
}

impl NodeBuilder {
    /// Loads settings from `CONFIG_PATH` and the environment, then applies
    /// `config_path` on top when given.
    pub fn new(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let mut settings = Settings::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", p);
            settings = settings.with_override_config(p)?;
        }
        Ok(Self::from_settings(settings, shutdown_signal))
    }

    /// Builder for already loaded settings; they are validated in
    /// [`start`](Self::start).
    pub fn from_settings(
        settings: Settings,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            settings,
            shutdown_signal,
        }
    }

    pub fn node_id(
        mut self,
        node_id: NodeId,
    ) -> Self {
        self.settings.cluster.node_id = node_id;
        self
    }

    pub fn listen_address(
        mut self,
        addr: SocketAddr,
    ) -> Self {
        self.settings.cluster.listen_address = addr;
        self
    }

    /// Members to join through, as socket addresses or `host:port`. An empty
    /// list bootstraps a new cluster.
    pub fn seeds<A: ToString>(
        mut self,
        seeds: Vec<A>,
    ) -> Self {
        self.settings.cluster.seeds = seeds.iter().map(ToString::to_string).collect();
        self
    }

    /// Address advertised to other members instead of the bound one.
    pub fn advertise_address(
        mut self,
        addr: SocketAddr,
    ) -> Self {
        self.settings.cluster.advertise_address = Some(addr);
        self
    }

    /// Starts every component and, with seeds configured, joins the cluster.
    ///
    /// Returns once the node is `Active` in its own view.
    pub async fn start(self) -> Result<Node> {
        let settings = Arc::new(self.settings.validate()?);
        let cluster = &settings.cluster;

        let listener = TcpListener::bind(cluster.listen_address)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: cluster.listen_address,
                source,
            })?;
        let endpoint = Endpoint::from(advertised_addr(
            cluster.advertise_address,
            listener.local_addr()?,
        ));
        // a restart under the same id must outrank what peers remember of the last run
        let local =
            MemberInfo::new(cluster.node_id.clone(), endpoint).with_incarnation(timestamp_millis());

        let initial = if cluster.seeds.is_empty() {
            info!(node_id = %local.id, %endpoint, "bootstrapping a new cluster");
            MembershipView::bootstrap(local.clone(), timestamp_millis())
        } else {
            info!(node_id = %local.id, %endpoint, seeds = ?cluster.seeds, "Node is joining");
            MembershipView::joining(local.clone(), timestamp_millis())
        };

        // stopped by `Node::leave`, which the external signal triggers
        let (stop_tx, stop_rx) = watch::channel(());
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let (service, writer) = MembershipService::start(
            local.clone(),
            initial,
            settings.policy.left_retention(),
            stop_rx.clone(),
        );
        handles.push(writer);
        let membership = Arc::new(service);

        let admission = AdmissionListener::from_listener(listener, &settings, membership.clone())?;
        let rx = stop_rx.clone();
        spawn_task("admission listener", move || admission.run(rx), Some(&mut handles));

        let connector = Connector::new(&settings.policy, &settings.network, settings.retry.gateway);

        if !cluster.seeds.is_empty() {
            let join_connector = connector.with_backoff(settings.retry.join);
            let joined = join_cluster(
                &join_connector,
                &cluster.seeds,
                settings.policy.open_connection_timeout(),
                &local,
                &membership,
            )
            .await;
            if let Err(e) = joined {
                warn!(node_id = %local.id, error = %e, "join failed, stopping node");
                let _ = stop_tx.send(());
                return Err(e);
            }
        }

        let registry = Arc::new(EndpointRegistry::new(
            membership.active_members().into_iter().map(|m| m.endpoint),
        ));
        let sync_registry = registry.clone();
        let sync_membership = membership.clone();
        let rx = stop_rx.clone();
        spawn_task(
            "registry sync",
            move || sync_registry_with_view(sync_registry, sync_membership, rx),
            Some(&mut handles),
        );

        let monitor = LivenessMonitor::new(
            SessionProber::new(connector.clone(), local.id.clone()),
            membership.clone(),
            &settings.policy,
        );
        let rx = stop_rx.clone();
        spawn_task("liveness monitor", move || monitor.run(rx), Some(&mut handles));

        let gossiper = Gossiper::new(connector.clone(), membership.clone(), settings.policy.gossip_interval());
        let generations = membership.subscribe();
        let rx = stop_rx.clone();
        spawn_task("gossiper", move || gossiper.run(generations, rx), Some(&mut handles));

        info!(node_id = %local.id, %endpoint, "Node is running");
        Ok(Node {
            local,
            settings,
            membership,
            registry,
            connector,
            shutdown_signal: self.shutdown_signal,
            stop_tx,
            handles,
        })
    }
}

/// Joins through the first seed that admits us and adopts its view.
///
/// Seed host names are resolved here, each lookup bounded by
/// `resolve_timeout`.
async fn join_cluster(
    connector: &Connector,
    seeds: &[String],
    resolve_timeout: Duration,
    local: &MemberInfo,
    membership: &MembershipService,
) -> Result<()> {
    let resolved = resolve_all(seeds, resolve_timeout).await?;
    // a seed that names this node cannot admit it
    let seeds = EndpointRegistry::new(resolved.into_iter().filter(|e| *e != local.endpoint));
    let role = PeerRole::Joiner {
        node_id: local.id.clone(),
        endpoint: local.endpoint,
        incarnation: local.incarnation,
    };
    let session = connector.connect_any(&seeds, role).await?;
    let peer = session.peer();

    let welcome = session
        .welcome()
        .cloned()
        .ok_or_else(|| SystemError::NodeStartFailed(format!("no welcome from {peer}")))?;
    let view = membership.merge(welcome.members).await?;
    if let Err(e) = session.close().await {
        debug!(%peer, error = %e, "closing join session");
    }

    match view.local_status() {
        Some(MemberStatus::Active) => {
            info!(node_id = %local.id, %peer, generation = view.generation(), "joined cluster");
            Ok(())
        }
        status => Err(MembershipError::JoinRejected {
            peer,
            reason: format!("admitting member did not report us active ({status:?})"),
        }
        .into()),
    }
}

/// Keeps the registry in line with the view: active members are candidates,
/// departed members are not.
async fn sync_registry_with_view(
    registry: Arc<EndpointRegistry>,
    membership: Arc<MembershipService>,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let mut generations = membership.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            changed = generations.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        for member in membership.snapshot().list_members() {
            match member.status {
                MemberStatus::Active => {
                    registry.add(member.endpoint);
                }
                MemberStatus::Left => {
                    registry.remove(&member.endpoint);
                }
                MemberStatus::Joining | MemberStatus::Unreachable => {}
            }
        }
    }
}
