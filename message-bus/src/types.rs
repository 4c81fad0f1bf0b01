//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque peer identifier
///
/// Ordered lexicographically; leader election relies on this ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Chain traffic: block creation, commits, snapshots
    Blockchain,
    /// Leader election
    LeaderElection,
    /// Block admission votes
    Vote,
}

impl Channel {
    /// Every channel a node subscribes to
    pub const ALL: [Channel; 3] = [Channel::Blockchain, Channel::LeaderElection, Channel::Vote];

    /// Topic name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Blockchain => "blockchain",
            Channel::LeaderElection => "leader-election",
            Channel::Vote => "vote",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope `type` field
///
/// Type strings this node does not know are preserved in [`EventKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// A node claims the master role
    MasterAnnouncement,
    /// A node starts an election round
    Election,
    /// A proposer asks for approval of a mined block
    VoteRequest,
    /// Ballot for an election or a block, told apart by channel
    VoteResponse,
    /// Observer asks for a chain snapshot
    RequestSyncBlockchain,
    /// Node asks the master for a chain snapshot
    RequestSyncBlockchainServer,
    /// Canonical snapshot pushed by the master
    BlockchainUpdate,
    /// Request to mine a block
    CreateBlock,
    /// Alias of [`EventKind::CreateBlock`]
    MineBlock,
    /// Committed block
    AddBlock,
    /// Snapshot for observers
    Blockchain,
    /// Unrecognized type string
    Other(String),
}

impl EventKind {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::MasterAnnouncement => "MASTER_ANNOUNCEMENT",
            EventKind::Election => "ELECTION",
            EventKind::VoteRequest => "VOTE_REQUEST",
            EventKind::VoteResponse => "VOTE_RESPONSE",
            EventKind::RequestSyncBlockchain => "REQUEST_SYNC_BLOCKCHAIN",
            EventKind::RequestSyncBlockchainServer => "REQUEST_SYNC_BLOCKCHAIN_SERVER",
            EventKind::BlockchainUpdate => "BLOCKCHAIN_UPDATE",
            EventKind::CreateBlock => "CREATE_BLOCK",
            EventKind::MineBlock => "MINE_BLOCK",
            EventKind::AddBlock => "ADD_BLOCK",
            EventKind::Blockchain => "BLOCKCHAIN",
            EventKind::Other(other) => other,
        }
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "MASTER_ANNOUNCEMENT" => EventKind::MasterAnnouncement,
            "ELECTION" => EventKind::Election,
            "VOTE_REQUEST" => EventKind::VoteRequest,
            "VOTE_RESPONSE" => EventKind::VoteResponse,
            "REQUEST_SYNC_BLOCKCHAIN" => EventKind::RequestSyncBlockchain,
            "REQUEST_SYNC_BLOCKCHAIN_SERVER" => EventKind::RequestSyncBlockchainServer,
            "BLOCKCHAIN_UPDATE" => EventKind::BlockchainUpdate,
            "CREATE_BLOCK" => EventKind::CreateBlock,
            "MINE_BLOCK" => EventKind::MineBlock,
            "ADD_BLOCK" => EventKind::AddBlock,
            "BLOCKCHAIN" => EventKind::Blockchain,
            _ => EventKind::Other(kind),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
