//! Node controller
//!
//! Owns the ledger, the election state and the vote coordinator, and routes
//! every input to them. Synchronous: it never awaits and performs no I/O;
//! the returned [`Action`]s are carried out by the runner.

use crate::config::ProtocolTimings;
use crate::election::{Election, ElectionStatus};
use crate::messages::{
    publish, Action, BlockBallot, ChainUpdate, ElectionBallot, ElectionRequest, MasterAnnouncement,
    NodeInput, PeerView, SyncRequest, TimerId, VoteRequest,
};
use crate::vote::{VoteCoordinator, VoteDecision};
use chrono::Utc;
use ledger_core::{Block, BlockData, ChainAdoption, ChainSnapshot, Ledger};
use message_bus::{metrics::record_receive, Channel, Envelope, EventKind, PeerId, SharedDedup};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Local peer id
    pub peer_id: PeerId,
    /// Election state
    pub election: ElectionStatus,
    /// Blocks including genesis
    pub chain_length: usize,
    /// Hash of the head block
    pub head_hash: String,
    /// True while mining or voting
    pub busy: bool,
}

/// Protocol state of one node
pub struct NodeController {
    local: PeerId,
    ledger: Ledger,
    election: Election,
    votes: VoteCoordinator,
    dedup: SharedDedup,
    peers: Arc<dyn PeerView>,
    timings: ProtocolTimings,
    now: Duration,
    /// Counter for chain updates, keeps repeated snapshots distinct
    updates: u64,
}

impl std::fmt::Debug for NodeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeController")
            .field("local", &self.local)
            .field("ledger", &self.ledger)
            .field("election", &self.election.status())
            .field("busy", &self.votes.is_busy())
            .finish_non_exhaustive()
    }
}

impl NodeController {
    /// Create a controller for `local`
    pub fn new(
        local: PeerId,
        ledger: Ledger,
        peers: Arc<dyn PeerView>,
        dedup: SharedDedup,
        timings: ProtocolTimings,
    ) -> Self {
        Self {
            election: Election::new(local.clone(), timings.election_round_timeout),
            votes: VoteCoordinator::new(local.clone(), timings.vote_deadline),
            local,
            ledger,
            dedup,
            peers,
            timings,
            now: Duration::ZERO,
            updates: 0,
        }
    }

    /// Local peer id
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// The ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Dedup cache shared with the publisher
    pub fn dedup(&self) -> &SharedDedup {
        &self.dedup
    }

    /// Election state
    pub fn election(&self) -> &Election {
        &self.election
    }

    /// Vote coordinator
    pub fn votes(&self) -> &VoteCoordinator {
        &self.votes
    }

    /// Status snapshot
    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            peer_id: self.local.clone(),
            election: self.election.status(),
            chain_length: self.ledger.chain().len(),
            head_hash: self.ledger.head_hash().to_string(),
            busy: self.votes.is_busy(),
        }
    }

    /// Chain snapshot
    pub fn snapshot(&self) -> ChainSnapshot {
        self.ledger.snapshot()
    }

    /// Set the current time
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Timers to arm when the node comes up
    pub fn start(&mut self) -> Vec<Action> {
        info!(
            node = %self.local,
            blocks = self.ledger.chain().len(),
            head = %self.ledger.head_hash(),
            "Node starting"
        );
        vec![
            Action::SetTimer {
                id: TimerId::ElectionTick,
                after: self.timings.election_tick,
            },
            Action::SetTimer {
                id: TimerId::DedupClear,
                after: self.timings.dedup_clear_interval,
            },
            Action::SetTimer {
                id: TimerId::StartupSync,
                after: self.timings.startup_sync_delay,
            },
        ]
    }

    /// Process one input
    pub fn handle(&mut self, input: NodeInput) -> Vec<Action> {
        let was_master = self.election.is_master();

        let mut actions = match input {
            NodeInput::Envelope {
                channel,
                from,
                envelope,
            } => self.on_envelope(channel, from, envelope),
            NodeInput::PeerJoined(peer) => {
                debug!(%peer, "Peer joined");
                Vec::new()
            }
            NodeInput::PeerLeft(peer) => {
                debug!(%peer, "Peer left");
                self.election.on_peer_left(&peer);
                Vec::new()
            }
            NodeInput::Timer(id) => self.on_timer(id),
            NodeInput::BlockMined(block) => self.votes.on_mined(block, &self.ledger, self.now),
            NodeInput::MiningAborted => {
                self.votes.mining_aborted();
                Vec::new()
            }
            NodeInput::CreateBlock(data) => self.request_block(data),
        };

        if !was_master && self.election.is_master() {
            info!(node = %self.local, "Became master, pushing chain snapshot");
            actions.push(self.chain_update(EventKind::BlockchainUpdate));
        }
        actions
    }

    fn on_envelope(&mut self, channel: Channel, from: PeerId, envelope: Envelope) -> Vec<Action> {
        if !self.dedup.lock().admit(&envelope.id) {
            trace!(id = %envelope.id, kind = %envelope.kind, "Duplicate envelope dropped");
            record_receive(envelope.kind.as_str(), "duplicate");
            return Vec::new();
        }
        record_receive(envelope.kind.as_str(), "accepted");
        trace!(%channel, %from, kind = %envelope.kind, "Dispatching envelope");

        match &envelope.kind {
            EventKind::MasterAnnouncement => self
                .decode::<MasterAnnouncement>(&envelope)
                .map(|a| self.election.on_announcement(&a))
                .unwrap_or_default(),
            EventKind::Election => self
                .decode::<ElectionRequest>(&envelope)
                .map(|r| self.election.on_request(&r, self.now))
                .unwrap_or_default(),
            EventKind::VoteResponse => match channel {
                Channel::LeaderElection => {
                    let peer_count = self.peers.peer_count(Channel::LeaderElection);
                    self.decode::<ElectionBallot>(&envelope)
                        .map(|b| self.election.on_ballot(b, self.now, peer_count))
                        .unwrap_or_default()
                }
                Channel::Vote => {
                    if let Some(ballot) = self.decode::<BlockBallot>(&envelope) {
                        self.votes.on_ballot(ballot);
                    }
                    Vec::new()
                }
                Channel::Blockchain => {
                    warn!(%from, "VOTE_RESPONSE on the blockchain channel ignored");
                    Vec::new()
                }
            },
            EventKind::VoteRequest => self
                .decode::<VoteRequest>(&envelope)
                .map(|r| vec![self.votes.respond(&r, &self.ledger)])
                .unwrap_or_default(),
            EventKind::CreateBlock | EventKind::MineBlock => self
                .decode::<BlockData>(&envelope)
                .map(|data| self.request_block(data))
                .unwrap_or_default(),
            EventKind::AddBlock => self
                .decode::<Block>(&envelope)
                .map(|block| self.on_add_block(block))
                .unwrap_or_default(),
            EventKind::BlockchainUpdate => {
                if let Some(update) = self.decode::<ChainUpdate>(&envelope) {
                    self.on_chain_update(&from, update);
                }
                Vec::new()
            }
            EventKind::RequestSyncBlockchainServer => {
                if self.election.is_master() {
                    info!(%from, "Sync requested, sending chain");
                    vec![self.chain_update(EventKind::BlockchainUpdate)]
                } else {
                    Vec::new()
                }
            }
            EventKind::RequestSyncBlockchain => {
                if self.election.is_master() {
                    debug!("Broadcasting chain to observers");
                    vec![self.chain_update(EventKind::Blockchain)]
                } else {
                    Vec::new()
                }
            }
            EventKind::Blockchain => Vec::new(),
            EventKind::Other(kind) => {
                warn!(%kind, %from, %channel, "Unknown event type");
                Vec::new()
            }
        }
    }

    fn on_timer(&mut self, id: TimerId) -> Vec<Action> {
        match id {
            TimerId::ElectionTick => {
                let peer_count = self.peers.peer_count(Channel::LeaderElection);
                let mut actions = self.election.on_tick(self.now, peer_count);
                actions.push(Action::SetTimer {
                    id: TimerId::ElectionTick,
                    after: self.timings.election_tick,
                });
                actions
            }
            TimerId::ElectionRound(round_id) => {
                self.election.on_round_timeout(round_id);
                Vec::new()
            }
            TimerId::VoteDeadline(hash) => self.finalize_vote(&hash),
            TimerId::DedupClear => {
                self.dedup.lock().clear();
                vec![Action::SetTimer {
                    id: TimerId::DedupClear,
                    after: self.timings.dedup_clear_interval,
                }]
            }
            TimerId::StartupSync => {
                info!(node = %self.local, "Requesting chain from master");
                vec![publish(
                    Channel::Blockchain,
                    EventKind::RequestSyncBlockchainServer,
                    &SyncRequest {
                        requester: self.local.clone(),
                        timestamp: Utc::now(),
                    },
                )]
            }
        }
    }

    fn request_block(&mut self, data: BlockData) -> Vec<Action> {
        if !self.votes.begin_mining() {
            warn!(client = %data.client_id, "Block already in progress, request dropped");
            return Vec::new();
        }

        let candidate = self.ledger.candidate(data, Utc::now());
        info!(index = candidate.index, "Mining new block");
        vec![Action::Mine {
            candidate,
            difficulty: self.ledger.difficulty(),
        }]
    }

    fn finalize_vote(&mut self, hash: &str) -> Vec<Action> {
        let peer_count = self.peers.peer_count(Channel::Blockchain);
        match self.votes.finalize(hash, peer_count) {
            Some(VoteDecision::Commit(block)) => {
                if self.ledger.add_block(block.clone()) {
                    vec![publish(Channel::Blockchain, EventKind::AddBlock, &block)]
                } else {
                    warn!(hash = %block.hash, "Approved block no longer fits the head, not announcing");
                    Vec::new()
                }
            }
            Some(VoteDecision::Reject { .. }) | None => Vec::new(),
        }
    }

    fn on_add_block(&mut self, block: Block) -> Vec<Action> {
        if let Some(existing) = self.ledger.chain().blocks().get(block.index as usize) {
            if existing.hash == block.hash {
                trace!(index = block.index, "Block already in chain");
                return Vec::new();
            }
        }

        if self.ledger.add_block(block.clone()) {
            return Vec::new();
        }

        // Diverged or fell behind; the master holds the canonical chain
        if self.election.current_master().is_some() && !self.election.is_master() {
            info!(index = block.index, "Chain out of step, requesting sync");
            return vec![publish(
                Channel::Blockchain,
                EventKind::RequestSyncBlockchainServer,
                &SyncRequest {
                    requester: self.local.clone(),
                    timestamp: Utc::now(),
                },
            )];
        }
        Vec::new()
    }

    fn on_chain_update(&mut self, from: &PeerId, update: ChainUpdate) {
        if self.election.current_master() != Some(from) || *from == self.local {
            warn!(%from, "Chain update from a peer that is not master ignored");
            return;
        }

        let chain = match update.snapshot.into_chain() {
            Ok(chain) => chain,
            Err(e) => {
                warn!(%from, "Malformed chain update: {}", e);
                return;
            }
        };

        if chain == *self.ledger.chain() {
            trace!("Chain already up to date");
            return;
        }

        match self.ledger.load_from_network(chain) {
            ChainAdoption::Replaced => info!(%from, blocks = self.ledger.chain().len(), "Chain updated from master"),
            ChainAdoption::Invalid(status) => warn!(%from, errors = ?status.errors, "Master sent an invalid chain"),
            ChainAdoption::ForeignGenesis => warn!(%from, "Master chain has a different genesis"),
        }
    }

    fn chain_update(&mut self, kind: EventKind) -> Action {
        self.updates += 1;
        publish(
            Channel::Blockchain,
            kind,
            &ChainUpdate {
                snapshot: self.ledger.snapshot(),
                master: self.local.clone(),
                seq: self.updates,
            },
        )
    }

    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> Option<T> {
        match envelope.decode() {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(kind = %envelope.kind, id = %envelope.id, "Undecodable payload: {}", e);
                None
            }
        }
    }
}
