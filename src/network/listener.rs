//! Admission Listener.
//!
//! The accept loop only accepts: every socket is handed to its own task that
//! runs the handshake under a deadline started at accept time. A peer that
//! opens a socket and never says `Hello` therefore holds one handshake slot
//! until its deadline and nothing else.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::protocol::check_hello;
use super::protocol::frame_codec;
use super::protocol::Message;
use super::protocol::PeerRole;
use super::session::Session;
use crate::constants::ACCEPT_ERROR_BACKOFF_IN_MS;
use crate::constants::REJECT_SEND_TIMEOUT_IN_MS;
use crate::metrics::ADMISSION_EVENTS;
use crate::metrics::INFLIGHT_HANDSHAKES;
use crate::Endpoint;
use crate::MemberInfo;
use crate::Membership;
use crate::MembershipView;
use crate::NetworkError;
use crate::Result;
use crate::Settings;

/// Slot held by one in-flight handshake.
struct HandshakeSlot {
    _permit: OwnedSemaphorePermit,
}

impl HandshakeSlot {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        INFLIGHT_HANDSHAKES.inc();
        Self { _permit: permit }
    }
}

impl Drop for HandshakeSlot {
    fn drop(&mut self) {
        INFLIGHT_HANDSHAKES.dec();
    }
}

/// Why an inbound handshake did not produce a session.
enum Refusal {
    /// Peer sent something other than a valid `Hello`
    Violation(String),
    /// Valid `Hello` that this node declines, e.g. a departed joiner
    Declined(String),
    /// Socket failed or closed before the handshake finished
    Transport(crate::Error),
}

/// Everything a connection task needs, shared by all of them.
struct Admission<M: Membership> {
    membership: Arc<M>,
    handshake_timeout: Duration,
    response_timeout: Duration,
    max_frame_size: usize,
    tcp_nodelay: bool,
}

pub struct AdmissionListener<M: Membership> {
    listener: TcpListener,
    local: Endpoint,
    slots: Arc<Semaphore>,
    admission: Arc<Admission<M>>,
}

impl<M: Membership> AdmissionListener<M> {
    /// Binds `addr`; port 0 picks a free port, see
    /// [`local_endpoint`](Self::local_endpoint).
    pub async fn bind(
        addr: SocketAddr,
        settings: &Settings,
        membership: Arc<M>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        Self::from_listener(listener, settings, membership)
    }

    /// Serves on an already bound socket, e.g. when the advertised endpoint
    /// has to be known before the membership view exists.
    pub fn from_listener(
        listener: TcpListener,
        settings: &Settings,
        membership: Arc<M>,
    ) -> Result<Self> {
        let local = Endpoint::from(listener.local_addr()?);

        Ok(Self {
            listener,
            local,
            slots: Arc::new(Semaphore::new(settings.network.max_inflight_handshakes)),
            admission: Arc::new(Admission {
                membership,
                handshake_timeout: settings.policy.handshake_timeout(),
                response_timeout: settings.policy.response_timeout(),
                max_frame_size: settings.network.max_frame_size,
                tcp_nodelay: settings.network.tcp_nodelay,
            }),
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Accepts connections until `shutdown` fires.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!(endpoint = %self.local, "admission listener started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!(endpoint = %self.local, "admission listener received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.dispatch(stream, addr, shutdown.clone()),
                    Err(e) => {
                        // usually descriptor exhaustion; give the process a moment
                        warn!(error = %e, "accept failed");
                        sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_IN_MS)).await;
                    }
                },
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: watch::Receiver<()>,
    ) {
        let deadline = Instant::now() + self.admission.handshake_timeout;
        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => HandshakeSlot::new(permit),
            Err(_) => {
                warn!(peer = %addr, "no free handshake slot, dropping connection");
                ADMISSION_EVENTS.with_label_values(&["overloaded"]).inc();
                return;
            }
        };

        let admission = self.admission.clone();
        tokio::spawn(async move {
            admission.handle(stream, addr, deadline, slot, shutdown).await;
        });
    }
}

impl<M: Membership> Admission<M> {
    async fn handle(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        deadline: Instant,
        slot: HandshakeSlot,
        shutdown: watch::Receiver<()>,
    ) {
        let peer = Endpoint::from(addr);
        if let Err(e) = stream.set_nodelay(self.tcp_nodelay) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
        let framed = Framed::new(stream, frame_codec(self.max_frame_size));
        let mut session = Session::inbound(framed, peer, self.response_timeout);

        match timeout_at(deadline, self.handshake(&mut session)).await {
            Ok(Ok(role)) => {
                ADMISSION_EVENTS.with_label_values(&["admitted"]).inc();
                debug!(%peer, ?role, "handshake completed");
            }
            Ok(Err(Refusal::Violation(reason))) => {
                warn!(%peer, %reason, "protocol violation during handshake");
                ADMISSION_EVENTS.with_label_values(&["protocol_violation"]).inc();
                reject(&mut session, reason).await;
                return;
            }
            Ok(Err(Refusal::Declined(reason))) => {
                info!(%peer, %reason, "handshake declined");
                ADMISSION_EVENTS.with_label_values(&["declined"]).inc();
                reject(&mut session, reason).await;
                return;
            }
            Ok(Err(Refusal::Transport(e))) => {
                debug!(%peer, error = %e, "connection lost during handshake");
                ADMISSION_EVENTS.with_label_values(&["aborted"]).inc();
                return;
            }
            Err(_) => {
                warn!(
                    %peer,
                    timeout = ?self.handshake_timeout,
                    "handshake did not complete in time, discarding connection"
                );
                ADMISSION_EVENTS.with_label_values(&["handshake_timeout"]).inc();
                return;
            }
        }

        drop(slot);
        self.serve(session, shutdown).await;
    }

    async fn handshake(
        &self,
        session: &mut Session,
    ) -> std::result::Result<PeerRole, Refusal> {
        let first = match session.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(Refusal::Transport(
                    NetworkError::ConnectionClosed(session.peer()).into(),
                ))
            }
            Err(e) if is_malformed(&e) => return Err(Refusal::Violation(e.to_string())),
            Err(e) => return Err(Refusal::Transport(e)),
        };

        let role = match first {
            Message::Hello {
                magic,
                version,
                role,
            } => {
                check_hello(magic, version).map_err(Refusal::Violation)?;
                role
            }
            other => {
                return Err(Refusal::Violation(format!(
                    "expected Hello, received {}",
                    other.kind()
                )))
            }
        };

        let view = match &role {
            PeerRole::Joiner {
                node_id,
                endpoint,
                incarnation,
            } => self
                .membership
                .admit(MemberInfo::new(node_id.clone(), *endpoint).with_incarnation(*incarnation))
                .await
                .map_err(|e| Refusal::Declined(e.to_string()))?,
            PeerRole::Member { .. } | PeerRole::Client { .. } => self.membership.snapshot(),
        };

        session
            .send(&welcome(&view))
            .await
            .map_err(Refusal::Transport)?;
        Ok(role)
    }

    /// Answers requests on an admitted session until the peer hangs up.
    async fn serve(
        &self,
        mut session: Session,
        mut shutdown: watch::Receiver<()>,
    ) {
        let peer = session.peer();
        loop {
            let request = tokio::select! {
                _ = shutdown.changed() => break,
                request = session.recv() => match request {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(%peer, error = %e, "session read failed");
                        break;
                    }
                },
            };

            trace!(%peer, kind = request.kind(), "request");
            let (reply, keep_open) = match self.respond(request).await {
                Ok(reply) => (reply, true),
                Err(reason) => (Message::Reject { reason }, false),
            };
            if let Err(e) = session.send(&reply).await {
                debug!(%peer, error = %e, "session write failed");
                break;
            }
            if !keep_open {
                break;
            }
        }
        trace!(%peer, "session closed");
    }

    async fn respond(
        &self,
        request: Message,
    ) -> std::result::Result<Message, String> {
        match request {
            Message::ListMembers { only_active } => {
                let view = self.membership.snapshot();
                let members = if only_active {
                    view.active_members()
                } else {
                    view.list_members()
                };
                Ok(Message::Members {
                    generation: view.generation(),
                    members,
                })
            }
            Message::Ping { .. } => Ok(Message::Ack {
                from: self.membership.local_id(),
                generation: self.membership.snapshot().generation(),
            }),
            Message::Gossip { from, members } => {
                trace!(%from, entries = members.len(), "gossip received");
                let view = self.membership.merge(members).await.map_err(|e| e.to_string())?;
                Ok(Message::GossipAck {
                    generation: view.generation(),
                })
            }
            Message::Leave { node_id } => {
                info!(%node_id, "departure notice received");
                let view = self.membership.depart(node_id).await.map_err(|e| e.to_string())?;
                Ok(Message::GossipAck {
                    generation: view.generation(),
                })
            }
            other => Err(format!("unexpected {} on an established session", other.kind())),
        }
    }
}

fn welcome(view: &MembershipView) -> Message {
    Message::Welcome {
        node_id: view.owner().clone(),
        generation: view.generation(),
        members: view.list_members(),
    }
}

/// Garbled frames and undecodable payloads, as opposed to a broken socket.
fn is_malformed(e: &crate::Error) -> bool {
    match e {
        crate::Error::System(crate::SystemError::Network(NetworkError::Codec(_))) => true,
        crate::Error::System(crate::SystemError::Network(NetworkError::Io(io))) => {
            io.kind() == std::io::ErrorKind::InvalidData
        }
        _ => false,
    }
}

/// Best effort: the peer may well be the reason we are rejecting.
async fn reject(
    session: &mut Session,
    reason: String,
) {
    let message = Message::Reject { reason };
    let _ = timeout(
        Duration::from_millis(REJECT_SEND_TIMEOUT_IN_MS),
        session.send(&message),
    )
    .await;
}
