//! Protocol payloads and the controller's inputs and outputs

use chrono::{DateTime, Utc};
use ledger_core::{Block, BlockData, ChainSnapshot};
use message_bus::{Channel, Envelope, EventKind, Message, PeerId, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// `ELECTION` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionRequest {
    /// Initiator of the round
    pub candidate_id: PeerId,
    /// Round identifier
    pub round_id: Uuid,
}

/// `VOTE_RESPONSE` payload on the election channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionBallot {
    /// Round being answered
    pub round_id: Uuid,
    /// Always true for election ballots
    pub vote: bool,
    /// Lowest candidate the voter has seen
    pub candidate_id: PeerId,
    /// Voting peer
    pub voter: PeerId,
}

/// `MASTER_ANNOUNCEMENT` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAnnouncement {
    /// The new master
    pub master_id: PeerId,
    /// Announcement counter of the announcing node
    pub seq: u64,
}

/// `VOTE_REQUEST` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// Mined candidate
    pub block: Block,
    /// Peer that mined it
    pub proposer: PeerId,
}

/// `VOTE_RESPONSE` payload on the vote channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBallot {
    /// Hash of the block being voted on
    pub block_hash: String,
    /// Approval
    pub vote: bool,
    /// Voting peer
    pub voter: PeerId,
}

/// `REQUEST_SYNC_BLOCKCHAIN_SERVER` / `REQUEST_SYNC_BLOCKCHAIN` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Asking peer
    pub requester: PeerId,
    /// Request time, keeps repeated requests distinct
    pub timestamp: DateTime<Utc>,
}

/// `BLOCKCHAIN_UPDATE` / `BLOCKCHAIN` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainUpdate {
    /// Chain, validity report and difficulty
    #[serde(flatten)]
    pub snapshot: ChainSnapshot,
    /// Sending master
    pub master: PeerId,
    /// Publication counter of the sending master
    pub seq: u64,
}

/// Timer identification for scheduled inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Periodic election failure-detection tick
    ElectionTick,
    /// Lapse of an election round without majority
    ElectionRound(Uuid),
    /// Decision point of the vote on a block, by hash
    VoteDeadline(String),
    /// Periodic dedup wipe
    DedupClear,
    /// One-shot resync after startup
    StartupSync,
}

/// Everything the controller reacts to
#[derive(Debug, Clone)]
pub enum NodeInput {
    /// Envelope received from a peer
    Envelope {
        /// Channel it arrived on
        channel: Channel,
        /// Sending peer
        from: PeerId,
        /// Decoded envelope
        envelope: Envelope,
    },
    /// A peer connected
    PeerJoined(PeerId),
    /// A peer disconnected
    PeerLeft(PeerId),
    /// A scheduled timer fired
    Timer(TimerId),
    /// The miner finished, successfully or not
    BlockMined(Block),
    /// The mining job died without producing a block
    MiningAborted,
    /// Local request to mine a block
    CreateBlock(BlockData),
}

/// Everything the controller asks its runner to do
#[derive(Debug, Clone)]
pub enum Action {
    /// Broadcast a message
    Publish {
        /// Target channel
        channel: Channel,
        /// Message to envelope
        message: Message,
    },
    /// Deliver `Timer(id)` after a delay
    SetTimer {
        /// Timer to fire
        id: TimerId,
        /// Delay from now
        after: Duration,
    },
    /// Run proof-of-work on a candidate
    Mine {
        /// Unmined block
        candidate: Block,
        /// Required leading zero digits
        difficulty: usize,
    },
}

/// Build a publish action. Payload types here always serialize.
pub(crate) fn publish<T: Serialize>(channel: Channel, kind: EventKind, payload: &T) -> Action {
    let data = serde_json::to_value(payload).unwrap_or_else(|e| {
        tracing::error!(%kind, "Failed to encode payload: {}", e);
        serde_json::Value::Null
    });
    Action::Publish {
        channel,
        message: Message::new(kind, data),
    }
}

/// Source of the observed peer count
pub trait PeerView: Send + Sync {
    /// Peers on `channel`, the local node included
    fn peer_count(&self, channel: Channel) -> usize;
}

/// [`PeerView`] backed by a transport's subscriber counts
pub struct TransportPeers {
    transport: Arc<dyn Transport>,
}

impl TransportPeers {
    /// Wrap a transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl std::fmt::Debug for TransportPeers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPeers")
            .field("local", self.transport.local_peer_id())
            .finish()
    }
}

impl PeerView for TransportPeers {
    fn peer_count(&self, channel: Channel) -> usize {
        self.transport.subscriber_count(channel) + 1
    }
}
