use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::view::ViewChange;
use super::Membership;
use crate::metrics::MEMBERSHIP_GENERATION;
use crate::time::timestamp_millis;
use crate::Member;
use crate::MemberInfo;
use crate::MembershipError;
use crate::MembershipView;
use crate::NodeId;
use crate::Result;

const COMMAND_QUEUE_CAPACITY: usize = 1024;

struct Command {
    change: ViewChange,
    reply: oneshot::Sender<std::result::Result<Arc<MembershipView>, MembershipError>>,
}

/// Handle to the local membership view.
///
/// All changes travel over a channel to a single writer task, which applies
/// them in order and publishes every new generation with an atomic pointer
/// swap. Readers only ever load that pointer.
#[derive(Clone)]
pub struct MembershipService {
    local: MemberInfo,
    current: Arc<ArcSwap<MembershipView>>,
    commands: mpsc::Sender<Command>,
    generations: watch::Receiver<u64>,
}

impl MembershipService {
    /// Spawns the writer task for `initial` and returns the handle to it.
    ///
    /// Departed members are dropped from the view once `left_retention` has
    /// passed since their departure. The writer stops when `shutdown` fires or
    /// every handle is dropped.
    pub fn start(
        local: MemberInfo,
        initial: MembershipView,
        left_retention: Duration,
        shutdown: watch::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (generation_tx, generations) = watch::channel(initial.generation());
        MEMBERSHIP_GENERATION.set(initial.generation() as i64);

        let current = Arc::new(ArcSwap::from_pointee(initial));
        let writer = MembershipWriter {
            current: current.clone(),
            generation_tx,
            left_retention,
        };
        let handle = tokio::spawn(writer.run(rx, shutdown));

        (
            Self {
                local,
                current,
                commands,
                generations,
            },
            handle,
        )
    }

    pub fn local(&self) -> &MemberInfo {
        &self.local
    }

    /// Notified with the generation number of every published view.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generations.clone()
    }

    pub fn list_members(&self) -> Vec<Member> {
        self.current.load().list_members()
    }

    pub fn active_members(&self) -> Vec<Member> {
        self.current.load().active_members()
    }

    async fn submit(
        &self,
        change: ViewChange,
    ) -> Result<Arc<MembershipView>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command { change, reply })
            .await
            .map_err(|_| MembershipError::WriterClosed)?;
        let view = rx.await.map_err(|_| MembershipError::WriterClosed)??;
        Ok(view)
    }
}

#[async_trait]
impl Membership for MembershipService {
    fn local_id(&self) -> NodeId {
        self.local.id.clone()
    }

    fn snapshot(&self) -> Arc<MembershipView> {
        self.current.load_full()
    }

    async fn admit(
        &self,
        member: MemberInfo,
    ) -> Result<Arc<MembershipView>> {
        self.submit(ViewChange::Admit(member)).await
    }

    async fn merge(
        &self,
        members: Vec<Member>,
    ) -> Result<Arc<MembershipView>> {
        self.submit(ViewChange::Merge(members)).await
    }

    async fn mark_active(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>> {
        self.submit(ViewChange::Activate(id)).await
    }

    async fn mark_unreachable(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>> {
        self.submit(ViewChange::MarkUnreachable(id)).await
    }

    async fn depart(
        &self,
        id: NodeId,
    ) -> Result<Arc<MembershipView>> {
        self.submit(ViewChange::Depart(id)).await
    }
}

struct MembershipWriter {
    current: Arc<ArcSwap<MembershipView>>,
    generation_tx: watch::Sender<u64>,
    left_retention: Duration,
}

impl MembershipWriter {
    async fn run(
        self,
        mut rx: mpsc::Receiver<Command>,
        mut shutdown: watch::Receiver<()>,
    ) {
        let retention_ms = self.left_retention.as_millis() as u64;
        let mut expiry = tokio::time::interval((self.left_retention / 2).max(Duration::from_millis(1)));
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let command = tokio::select! {
                _ = shutdown.changed() => {
                    debug!("membership writer received shutdown signal");
                    break;
                }
                command = rx.recv() => match command {
                    Some(c) => c,
                    None => break,
                },
                _ = expiry.tick() => {
                    let _ = self.apply(&ViewChange::ExpireDeparted { retention_ms });
                    continue;
                }
            };

            let result = self.handle(command.change);
            // the submitter may have given up waiting
            let _ = command.reply.send(result);
        }
        info!("membership writer stopped");
    }

    fn handle(
        &self,
        change: ViewChange,
    ) -> std::result::Result<Arc<MembershipView>, MembershipError> {
        match change {
            // Joining is published first; the member becomes active once this
            // writer has recorded it.
            ViewChange::Admit(info) => {
                let id = info.id.clone();
                self.apply(&ViewChange::Admit(info))?;
                self.apply(&ViewChange::Activate(id))
            }
            other => self.apply(&other),
        }
    }

    fn apply(
        &self,
        change: &ViewChange,
    ) -> std::result::Result<Arc<MembershipView>, MembershipError> {
        let current = self.current.load_full();
        match current.apply(change, timestamp_millis()) {
            Ok(Some(next)) => Ok(self.publish(next)),
            Ok(None) => Ok(current),
            Err(e) => {
                warn!(?change, error = %e, "membership change rejected");
                Err(e)
            }
        }
    }

    fn publish(
        &self,
        next: MembershipView,
    ) -> Arc<MembershipView> {
        let generation = next.generation();
        let next = Arc::new(next);
        self.current.store(next.clone());
        MEMBERSHIP_GENERATION.set(generation as i64);
        self.generation_tx.send_replace(generation);
        info!(
            generation,
            members = next.len(),
            active = next.active_members().len(),
            "membership view published"
        );
        next
    }
}
