//! Connection Attempt Engine.
//!
//! Every outbound connection is a [`ConnectionAttempt`] running on its own task
//! with its own deadline timer, so an attempt against a stalled peer never
//! holds up another attempt. When the deadline fires the attempt future is
//! dropped, which closes the socket right away.

use std::io;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::protocol::frame_codec;
use super::protocol::Message;
use super::protocol::PeerRole;
use super::protocol::Welcome;
use super::session::Session;
use crate::async_task::AbortOnDrop;
use crate::metrics::CONNECT_ATTEMPTS;
use crate::BackoffPolicy;
use crate::ConnectError;
use crate::Endpoint;
use crate::EndpointRegistry;
use crate::Error;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Policy;
use crate::Result;

/// Life cycle of a single outbound attempt.
///
/// `Idle -> Connecting -> {Connected, TimedOut, Refused, Failed} -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Connecting,
    Connected,
    TimedOut,
    Refused,
    Failed,
    Closed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Connected
                | AttemptState::TimedOut
                | AttemptState::Refused
                | AttemptState::Failed
        )
    }

    pub fn can_transition_to(
        self,
        next: AttemptState,
    ) -> bool {
        match (self, next) {
            (AttemptState::Idle, AttemptState::Connecting) => true,
            (AttemptState::Connecting, n) => n.is_terminal(),
            (s, AttemptState::Closed) => s.is_terminal(),
            _ => false,
        }
    }
}

/// Parameters an attempt hands over to the session it produces.
#[derive(Debug, Clone, Copy)]
struct SessionParams {
    max_frame_size: usize,
    tcp_nodelay: bool,
    response_timeout: Duration,
}

/// One outbound handshake against one endpoint.
#[derive(Debug)]
pub struct ConnectionAttempt {
    target: Endpoint,
    started_at: Instant,
    deadline: Instant,
    state: AttemptState,
}

impl ConnectionAttempt {
    pub fn new(
        target: Endpoint,
        deadline: Instant,
    ) -> Self {
        Self {
            target,
            started_at: Instant::now(),
            deadline,
            state: AttemptState::Idle,
        }
    }

    pub fn target(&self) -> Endpoint {
        self.target
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    fn transition(
        &mut self,
        next: AttemptState,
    ) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal attempt transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(target = %self.target, from = ?self.state, to = ?next, "attempt transition");
        self.state = next;
    }

    async fn run(
        mut self,
        hello: Message,
        params: SessionParams,
    ) -> std::result::Result<Session, ConnectError> {
        self.transition(AttemptState::Connecting);

        let outcome = timeout_at(self.deadline, handshake(self.target, hello, params)).await;
        let result = match outcome {
            Ok(Ok(session)) => {
                self.transition(AttemptState::Connected);
                Ok(session)
            }
            Ok(Err(e)) => {
                self.transition(match e {
                    ConnectError::Refused { .. } => AttemptState::Refused,
                    ConnectError::Timeout { .. } => AttemptState::TimedOut,
                    _ => AttemptState::Failed,
                });
                Err(e)
            }
            // the handshake future, and the socket it owns, is gone by now
            Err(_) => {
                self.transition(AttemptState::TimedOut);
                Err(ConnectError::Timeout {
                    endpoint: self.target,
                    after: self.deadline.saturating_duration_since(self.started_at),
                })
            }
        };

        let label = match &result {
            Ok(_) => "connected",
            Err(e) => e.outcome_label(),
        };
        CONNECT_ATTEMPTS.with_label_values(&[label]).inc();
        debug!(
            target = %self.target,
            outcome = label,
            elapsed = ?self.started_at.elapsed(),
            "connection attempt finished"
        );

        self.transition(AttemptState::Closed);
        result
    }
}

async fn handshake(
    endpoint: Endpoint,
    hello: Message,
    params: SessionParams,
) -> std::result::Result<Session, ConnectError> {
    let stream = TcpStream::connect(endpoint.socket_addr())
        .await
        .map_err(|e| classify_io_error(endpoint, e))?;
    if let Err(e) = stream.set_nodelay(params.tcp_nodelay) {
        debug!(%endpoint, error = %e, "failed to set TCP_NODELAY");
    }

    let mut framed = Framed::new(stream, frame_codec(params.max_frame_size));
    let frame = hello.encode().map_err(|e| ConnectError::ProtocolViolation {
        endpoint,
        detail: format!("cannot encode hello: {e}"),
    })?;
    framed.send(frame).await.map_err(|e| classify_io_error(endpoint, e))?;

    let frame = match framed.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(classify_io_error(endpoint, e)),
        None => {
            return Err(ConnectError::NetworkFailure {
                endpoint,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection during handshake",
                ),
            })
        }
    };

    match Message::decode(&frame) {
        Ok(Message::Welcome {
            node_id,
            generation,
            members,
        }) => Ok(Session::outbound(
            framed,
            endpoint,
            Welcome {
                node_id,
                generation,
                members,
            },
            params.response_timeout,
        )),
        Ok(Message::Reject { reason }) => Err(ConnectError::Refused { endpoint, reason }),
        Ok(other) => Err(ConnectError::ProtocolViolation {
            endpoint,
            detail: format!("expected Welcome, received {}", other.kind()),
        }),
        Err(e) => Err(ConnectError::ProtocolViolation {
            endpoint,
            detail: format!("undecodable handshake reply: {e}"),
        }),
    }
}

fn classify_io_error(
    endpoint: Endpoint,
    e: io::Error,
) -> ConnectError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::Refused {
            endpoint,
            reason: e.to_string(),
        },
        // oversized or garbled length prefix
        io::ErrorKind::InvalidData => ConnectError::ProtocolViolation {
            endpoint,
            detail: e.to_string(),
        },
        _ => ConnectError::NetworkFailure { endpoint, source: e },
    }
}

/// Opens sessions to cluster endpoints under the configured policy.
#[derive(Debug, Clone)]
pub struct Connector {
    open_connection_timeout: Duration,
    params: SessionParams,
    backoff: BackoffPolicy,
}

impl Connector {
    pub fn new(
        policy: &Policy,
        network: &NetworkConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            open_connection_timeout: policy.open_connection_timeout(),
            params: SessionParams {
                max_frame_size: network.max_frame_size,
                tcp_nodelay: network.tcp_nodelay,
                response_timeout: policy.response_timeout(),
            },
            backoff,
        }
    }

    /// Same connector walking candidates with a different backoff.
    pub fn with_backoff(
        &self,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            backoff,
            ..self.clone()
        }
    }

    pub fn open_connection_timeout(&self) -> Duration {
        self.open_connection_timeout
    }

    /// Runs one attempt against `endpoint` that gives up at `deadline`.
    ///
    /// The attempt runs on its own task; dropping the returned future cancels
    /// it and releases the socket.
    pub async fn connect(
        &self,
        endpoint: Endpoint,
        deadline: Instant,
        role: PeerRole,
    ) -> std::result::Result<Session, ConnectError> {
        let attempt = ConnectionAttempt::new(endpoint, deadline);
        let task = AbortOnDrop::spawn(attempt.run(Message::hello(role), self.params));
        match task.await {
            Ok(result) => result,
            Err(e) => Err(ConnectError::NetworkFailure {
                endpoint,
                source: io::Error::new(io::ErrorKind::Other, e),
            }),
        }
    }

    /// [`connect`](Self::connect) with a deadline of one open-connection
    /// timeout from now.
    pub async fn open(
        &self,
        endpoint: Endpoint,
        role: PeerRole,
    ) -> std::result::Result<Session, ConnectError> {
        let deadline = Instant::now() + self.open_connection_timeout;
        self.connect(endpoint, deadline, role).await
    }

    /// Connects to the first candidate of `registry` that completes a
    /// handshake.
    ///
    /// Timeouts, refusals and network failures move on to the next candidate;
    /// each attempt gets a fresh deadline. After a full unsuccessful round
    /// the candidates are walked again after a backoff delay. A protocol
    /// violation is returned at once.
    pub async fn connect_any(
        &self,
        registry: &EndpointRegistry,
        role: PeerRole,
    ) -> Result<Session> {
        let rounds = self.backoff.max_retries + 1;
        let mut last_error: Option<ConnectError> = None;

        for round in 0..rounds {
            let candidates = registry.candidates();
            if candidates.is_empty() {
                return Err(NetworkError::NoCandidates.into());
            }

            for endpoint in candidates {
                match self.open(endpoint, role.clone()).await {
                    Ok(session) => {
                        debug!(%endpoint, round, "connected to candidate");
                        return Ok(session);
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(%endpoint, error = %e, "candidate unavailable, trying next");
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            if round + 1 < rounds {
                let delay = self.backoff.delay_for(round);
                debug!(round, ?delay, "no candidate reachable, backing off");
                sleep(delay).await;
            }
        }

        Err(last_error
            .map(Error::from)
            .unwrap_or_else(|| NetworkError::NoCandidates.into()))
    }
}
