//! Async node runner
//!
//! Single-writer actor around a [`NodeController`]:
//!
//! ```text
//!  transport events ─┐
//!  timers ───────────┼──► node task (controller.handle) ──► outbox task ──► transport
//!  mined blocks ─────┤             │
//!  NodeHandle ───────┘             └──► spawn_blocking(miner.solve)
//! ```
//!
//! The miner polls a watch channel carrying the head hash and gives up as
//! soon as the head moves away from its candidate's parent or the node
//! stops.

use crate::config::Config;
use crate::controller::{NodeController, NodeStatus};
use crate::messages::{Action, NodeInput, PeerView, TimerId, TransportPeers};
use crate::{Error, Result};
use ledger_core::{Block, BlockData, ChainSnapshot, Ledger, Miner};
use message_bus::{
    metrics::record_receive, spawn_outbox, Channel, DedupCache, Envelope, OutboxHandle, PeerId,
    Publisher, Transport, TransportEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Mailbox size of the node task
const COMMAND_BUFFER: usize = 64;

/// Requests to the node task
enum NodeCommand {
    /// Mine a block with this payload
    CreateBlock(BlockData),

    /// Get the chain snapshot
    Snapshot {
        response: oneshot::Sender<ChainSnapshot>,
    },

    /// Get the node status
    Status {
        response: oneshot::Sender<NodeStatus>,
    },

    /// Stop the node
    Shutdown,
}

/// Handle to a running node (cloneable, thread-safe)
#[derive(Clone)]
pub struct NodeHandle {
    id: PeerId,
    sender: mpsc::Sender<NodeCommand>,
    head: watch::Receiver<String>,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.id).finish()
    }
}

impl NodeHandle {
    /// Peer id of the node
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Ask the node to mine and propose a block
    pub async fn create_block(&self, data: BlockData) -> Result<()> {
        self.sender
            .send(NodeCommand::CreateBlock(data))
            .await
            .map_err(|_| Error::NodeStopped)
    }

    /// Chain snapshot
    pub async fn snapshot(&self) -> Result<ChainSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NodeCommand::Snapshot { response: tx })
            .await
            .map_err(|_| Error::NodeStopped)?;
        rx.await.map_err(|_| Error::NodeStopped)
    }

    /// Node status
    pub async fn status(&self) -> Result<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NodeCommand::Status { response: tx })
            .await
            .map_err(|_| Error::NodeStopped)?;
        rx.await.map_err(|_| Error::NodeStopped)
    }

    /// Current head hash without a round trip
    pub fn head_hash(&self) -> String {
        self.head.borrow().clone()
    }

    /// Stop the node
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NodeCommand::Shutdown)
            .await
            .map_err(|_| Error::NodeStopped)
    }
}

/// Subscribe `transport` to every channel and start a node on it.
///
/// Returns the handle and the node task; the task ends after
/// [`NodeHandle::shutdown`] or once every handle is dropped.
pub async fn spawn_node<T>(
    config: &Config,
    ledger: Ledger,
    transport: Arc<T>,
    events: mpsc::Receiver<TransportEvent>,
) -> Result<(NodeHandle, JoinHandle<()>)>
where
    T: Transport + 'static,
{
    let id = transport.local_peer_id().clone();
    for channel in Channel::ALL {
        transport.subscribe(channel).await?;
    }

    let transport: Arc<dyn Transport> = transport;
    let peers: Arc<dyn PeerView> = Arc::new(TransportPeers::new(Arc::clone(&transport)));
    let dedup = DedupCache::new().shared();
    let publisher = Publisher::new(transport, Arc::clone(&dedup), config.publisher());
    let (outbox, outbox_task) = spawn_outbox(publisher);

    let controller = NodeController::new(id.clone(), ledger, peers, dedup, config.protocol());
    let (head_tx, head_rx) = watch::channel(controller.ledger().head_hash().to_string());
    let (sender, mailbox) = mpsc::channel(COMMAND_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let node = NodeTask {
        controller,
        miner: config.miner(),
        outbox,
        mailbox,
        events,
        internal_tx,
        internal_rx,
        head: head_tx,
        started: Instant::now(),
    };

    let task = tokio::spawn(async move {
        node.run().await;
        // Outbox drains once the node task drops its handle
        if let Err(e) = outbox_task.await {
            error!("Outbox task failed: {}", e);
        }
    });

    info!(node = %id, "Node spawned");
    Ok((
        NodeHandle {
            id,
            sender,
            head: head_rx,
        },
        task,
    ))
}

struct NodeTask {
    controller: NodeController,
    miner: Miner,
    outbox: OutboxHandle,
    mailbox: mpsc::Receiver<NodeCommand>,
    events: mpsc::Receiver<TransportEvent>,
    internal_tx: mpsc::UnboundedSender<NodeInput>,
    internal_rx: mpsc::UnboundedReceiver<NodeInput>,
    head: watch::Sender<String>,
    started: Instant,
}

impl NodeTask {
    async fn run(mut self) {
        self.controller.set_time(self.started.elapsed());
        let actions = self.controller.start();
        self.execute(actions);

        loop {
            let input = tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(NodeCommand::CreateBlock(data)) => NodeInput::CreateBlock(data),
                    Some(NodeCommand::Snapshot { response }) => {
                        let _ = response.send(self.controller.snapshot());
                        continue;
                    }
                    Some(NodeCommand::Status { response }) => {
                        let _ = response.send(self.controller.status());
                        continue;
                    }
                    Some(NodeCommand::Shutdown) | None => break,
                },

                Some(event) = self.events.recv() => match decode_event(event) {
                    Some(input) => input,
                    None => continue,
                },

                Some(input) = self.internal_rx.recv() => input,

                else => break,
            };

            self.controller.set_time(self.started.elapsed());
            let actions = self.controller.handle(input);
            self.execute(actions);
            self.publish_head();
        }

        info!(node = %self.controller.local(), "Node stopped");
    }

    fn execute(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Publish { channel, message } => {
                    self.outbox.send(channel, message);
                }
                Action::SetTimer { id, after } => self.set_timer(id, after),
                Action::Mine {
                    candidate,
                    difficulty,
                } => self.mine(candidate, difficulty),
            }
        }
    }

    fn set_timer(&self, id: TimerId, after: std::time::Duration) {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(NodeInput::Timer(id));
        });
    }

    fn mine(&self, candidate: Block, difficulty: usize) {
        let miner = self.miner.clone();
        let tx = self.internal_tx.clone();
        let head = self.head.subscribe();
        let parent = candidate.previous_hash.clone();

        tokio::spawn(async move {
            let delay = miner.pacing_delay();
            if !delay.is_zero() {
                debug!(?delay, "Pacing before mining");
                tokio::time::sleep(delay).await;
            }

            let job = tokio::task::spawn_blocking(move || {
                miner.solve(candidate, difficulty, || {
                    head.has_changed().is_err() || *head.borrow() != parent
                })
            });

            let input = match job.await {
                Ok(block) => NodeInput::BlockMined(block),
                Err(e) => {
                    error!("Mining job failed: {}", e);
                    NodeInput::MiningAborted
                }
            };
            let _ = tx.send(input);
        });
    }

    fn publish_head(&self) {
        let current = self.controller.ledger().head_hash();
        self.head.send_if_modified(|head| {
            if head.as_str() != current {
                *head = current.to_string();
                true
            } else {
                false
            }
        });
    }
}

fn decode_event(event: TransportEvent) -> Option<NodeInput> {
    match event {
        TransportEvent::Message {
            channel,
            from,
            payload,
        } => match Envelope::from_bytes(&payload) {
            Ok(envelope) => Some(NodeInput::Envelope {
                channel,
                from,
                envelope,
            }),
            Err(e) => {
                warn!(%channel, %from, "Undecodable envelope: {}", e);
                record_receive("undecodable", "error");
                None
            }
        },
        TransportEvent::PeerJoined(peer) => Some(NodeInput::PeerJoined(peer)),
        TransportEvent::PeerLeft(peer) => Some(NodeInput::PeerLeft(peer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use message_bus::{EventKind, Message};

    #[test]
    fn test_decode_event_drops_garbage() {
        let event = TransportEvent::Message {
            channel: Channel::Vote,
            from: "a".into(),
            payload: Bytes::from_static(b"{not json"),
        };
        assert!(decode_event(event).is_none());
    }

    #[test]
    fn test_decode_event_envelope() {
        let envelope = Envelope::wrap(Message::new(EventKind::AddBlock, serde_json::json!(1))).unwrap();
        let event = TransportEvent::Message {
            channel: Channel::Blockchain,
            from: "a".into(),
            payload: Bytes::from(envelope.to_bytes().unwrap()),
        };

        match decode_event(event) {
            Some(NodeInput::Envelope { channel, from, envelope: decoded }) => {
                assert_eq!(channel, Channel::Blockchain);
                assert_eq!(from.as_str(), "a");
                assert_eq!(decoded, envelope);
            }
            other => panic!("unexpected input: {:?}", other),
        }
        assert!(matches!(
            decode_event(TransportEvent::PeerLeft("b".into())),
            Some(NodeInput::PeerLeft(p)) if p.as_str() == "b"
        ));
    }
}
