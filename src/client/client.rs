use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::Connector;
use crate::Endpoint;
use crate::EndpointRegistry;
use crate::Error;
use crate::Member;
use crate::Message;
use crate::NetworkError;
use crate::resolve_all;
use crate::PeerRole;
use crate::Result;
use crate::Session;
use crate::Settings;
use crate::SystemError;

/// Connection to a cluster through one of its gateway members.
///
/// Gateways are tried in registry order; an unresponsive gateway costs at
/// most one open-connection timeout before the next one is tried. Active
/// members learned from the cluster are added to the registry, so later
/// reconnects can use gateways that were not configured.
pub struct ClusterClient {
    client_id: String,
    registry: Arc<EndpointRegistry>,
    connector: Connector,
    session: Mutex<Option<Session>>,
}

impl ClusterClient {
    /// Connects to the first reachable gateway of `gateways`.
    pub async fn connect(
        gateways: Vec<SocketAddr>,
        settings: &Settings,
    ) -> Result<Self> {
        let registry = EndpointRegistry::new(gateways.into_iter().map(Endpoint::from));
        Self::with_registry(Arc::new(registry), settings).await
    }

    /// Connects through gateways given as `host:port`, resolving each name
    /// within the open-connection timeout. Unresolvable names are skipped.
    pub async fn connect_hosts(
        gateways: &[String],
        settings: &Settings,
    ) -> Result<Self> {
        let resolved = resolve_all(gateways, settings.policy.open_connection_timeout()).await?;
        Self::with_registry(Arc::new(EndpointRegistry::new(resolved)), settings).await
    }

    /// Connects through a registry shared with other components.
    pub async fn with_registry(
        registry: Arc<EndpointRegistry>,
        settings: &Settings,
    ) -> Result<Self> {
        let client = Self {
            client_id: nanoid::nanoid!(),
            registry,
            connector: Connector::new(&settings.policy, &settings.network, settings.retry.gateway),
            session: Mutex::new(None),
        };
        client.reconnect().await?;
        Ok(client)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn registry(&self) -> Arc<EndpointRegistry> {
        self.registry.clone()
    }

    /// Drops the current session, if any, and connects again.
    pub async fn reconnect(&self) -> Result<Endpoint> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            debug!(gateway = %old.peer(), "dropping gateway session");
        }

        let fresh = self.open().await?;
        let gateway = fresh.peer();
        *session = Some(fresh);
        info!(client_id = %self.client_id, %gateway, "connected to gateway");
        Ok(gateway)
    }

    /// Closes the session; the next request reconnects.
    pub async fn close(&self) -> Result<()> {
        match self.session.lock().await.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Gateway of the current session.
    pub async fn gateway(&self) -> Option<Endpoint> {
        self.session.lock().await.as_ref().map(|s| s.peer())
    }

    /// Members as seen by the gateway, ordered by id.
    ///
    /// A broken session is replaced once before the error is returned. A
    /// rejection is returned as is; the gateway closes the session after it.
    pub async fn list_members(
        &self,
        only_active: bool,
    ) -> Result<Vec<Member>> {
        let request = Message::ListMembers { only_active };
        let mut guard = self.session.lock().await;

        if let Some(session) = guard.as_mut() {
            let peer = session.peer();
            match session.request(&request).await {
                Ok(reply) => return self.members_from(peer, reply),
                Err(e) if is_rejection(&e) => {
                    *guard = None;
                    return Err(e);
                }
                Err(e) => warn!(gateway = %peer, error = %e, "gateway session failed, reconnecting"),
            }
        }

        *guard = None;
        let mut fresh = self.open().await?;
        let peer = fresh.peer();
        let reply = fresh.request(&request).await?;
        *guard = Some(fresh);
        self.members_from(peer, reply)
    }

    fn members_from(
        &self,
        peer: Endpoint,
        reply: Message,
    ) -> Result<Vec<Member>> {
        match reply {
            Message::Members { members, .. } => {
                self.learn(&members);
                Ok(members)
            }
            other => Err(NetworkError::UnexpectedMessage {
                peer,
                expected: "Members",
                received: other.kind(),
            }
            .into()),
        }
    }

    async fn open(&self) -> Result<Session> {
        let role = PeerRole::Client {
            client_id: self.client_id.clone(),
        };
        self.connector.connect_any(&self.registry, role).await
    }

    fn learn(
        &self,
        members: &[Member],
    ) {
        for member in members.iter().filter(|m| m.is_active()) {
            if self.registry.add(member.endpoint) {
                debug!(node_id = %member.id, endpoint = %member.endpoint, "learned gateway");
            }
        }
    }
}

fn is_rejection(e: &Error) -> bool {
    matches!(
        e,
        Error::System(SystemError::Network(NetworkError::Rejected { .. }))
    )
}
