//! Vote-gated block admission
//!
//! One block at a time: a mining job, then a vote round, then a commit or
//! reject decision when the deadline fires.

use crate::messages::{publish, Action, BlockBallot, TimerId, VoteRequest};
use ledger_core::{Block, Ledger};
use message_bus::{Channel, EventKind, PeerId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Open vote on a locally mined block
#[derive(Debug, Clone)]
pub struct VoteRound {
    /// Block under vote
    pub block: Block,
    /// Proposing peer (always the local node)
    pub proposer: PeerId,
    /// Ballots by voter
    pub votes: HashMap<PeerId, bool>,
    /// Controller time at which the round is decided
    pub deadline: Duration,
}

impl VoteRound {
    /// Affirmative ballots
    pub fn yes_votes(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }
}

/// Outcome of a finished vote round
#[derive(Debug, Clone, PartialEq)]
pub enum VoteDecision {
    /// Enough approvals: append and announce
    Commit(Block),
    /// Too few approvals
    Reject {
        /// Discarded block
        block: Block,
        /// Approvals received
        yes: usize,
        /// Approvals needed, the proposer's own included
        required: usize,
    },
}

/// `ceil(peer_count / 2)`
pub fn required_votes(peer_count: usize) -> usize {
    (peer_count + 1) / 2
}

/// Single-flight block admission
#[derive(Debug)]
pub struct VoteCoordinator {
    local: PeerId,
    round: Option<VoteRound>,
    mining: bool,
    deadline: Duration,
}

impl VoteCoordinator {
    /// Idle coordinator
    pub fn new(local: PeerId, deadline: Duration) -> Self {
        Self {
            local,
            round: None,
            mining: false,
            deadline,
        }
    }

    /// True while a mining job or a vote round is in flight
    pub fn is_busy(&self) -> bool {
        self.mining || self.round.is_some()
    }

    /// Open vote round, if any
    pub fn round(&self) -> Option<&VoteRound> {
        self.round.as_ref()
    }

    /// Claim the single-flight slot for a mining job
    pub fn begin_mining(&mut self) -> bool {
        if self.is_busy() {
            return false;
        }
        self.mining = true;
        true
    }

    /// The mining job ended without a block
    pub fn mining_aborted(&mut self) {
        self.mining = false;
    }

    /// The mining job ended. Opens a round if the block is worth voting on.
    pub fn on_mined(&mut self, block: Block, ledger: &Ledger, now: Duration) -> Vec<Action> {
        self.mining = false;

        if !block.valid || !block.has_valid_hash() {
            warn!(index = block.index, "Mined block fails its hash check, not voting");
            return Vec::new();
        }
        if !block.meets_difficulty(ledger.difficulty()) {
            warn!(index = block.index, "Mining was interrupted, not voting");
            return Vec::new();
        }
        if !ledger.is_valid_next(&block) {
            warn!(index = block.index, hash = %block.hash, "Head moved while mining, not voting");
            return Vec::new();
        }

        info!(index = block.index, hash = %block.hash, "Requesting votes for new block");
        let hash = block.hash.clone();
        let request = VoteRequest {
            block: block.clone(),
            proposer: self.local.clone(),
        };
        self.round = Some(VoteRound {
            block,
            proposer: self.local.clone(),
            votes: HashMap::new(),
            deadline: now + self.deadline,
        });

        vec![
            publish(Channel::Vote, EventKind::VoteRequest, &request),
            Action::SetTimer {
                id: TimerId::VoteDeadline(hash),
                after: self.deadline,
            },
        ]
    }

    /// Judge a peer's block against our own head and answer
    pub fn respond(&self, request: &VoteRequest, ledger: &Ledger) -> Action {
        let block = &request.block;
        let vote = block.has_valid_hash()
            && block.meets_difficulty(ledger.difficulty())
            && ledger.is_valid_next(block);

        debug!(
            proposer = %request.proposer,
            index = block.index,
            hash = %block.hash,
            vote,
            "Voting on block"
        );
        publish(
            Channel::Vote,
            EventKind::VoteResponse,
            &BlockBallot {
                block_hash: block.hash.clone(),
                vote,
                voter: self.local.clone(),
            },
        )
    }

    /// Record a ballot for the open round
    pub fn on_ballot(&mut self, ballot: BlockBallot) {
        match &mut self.round {
            Some(round) if round.block.hash == ballot.block_hash => {
                debug!(voter = %ballot.voter, vote = ballot.vote, "Block ballot received");
                round.votes.insert(ballot.voter, ballot.vote);
            }
            _ => debug!(hash = %ballot.block_hash, "Ballot for a block not under vote"),
        }
    }

    /// Decide the round for `block_hash`. The round is cleared either way.
    pub fn finalize(&mut self, block_hash: &str, peer_count: usize) -> Option<VoteDecision> {
        if self.round.as_ref().map(|r| r.block.hash.as_str()) != Some(block_hash) {
            return None;
        }
        let round = self.round.take()?;

        let yes = round.yes_votes();
        let required = required_votes(peer_count);
        if yes + 1 >= required {
            info!(hash = %round.block.hash, yes, required, peer_count, "Block approved");
            Some(VoteDecision::Commit(round.block))
        } else {
            warn!(hash = %round.block.hash, yes, required, peer_count, "Block rejected by vote");
            Some(VoteDecision::Reject {
                block: round.block,
                yes,
                required,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::{BlockData, MemoryStore, Miner};
    use serde_json::json;

    const DEADLINE: Duration = Duration::from_secs(5);

    fn ledger() -> Ledger {
        Ledger::open(Box::new(MemoryStore::new()), 1).unwrap()
    }

    fn mined(ledger: &Ledger) -> Block {
        let candidate = ledger.candidate(BlockData::new("c1", json!("tx")), Utc::now());
        Miner::new().solve(candidate, ledger.difficulty(), || false)
    }

    fn ballot(hash: &str, voter: &str, vote: bool) -> BlockBallot {
        BlockBallot {
            block_hash: hash.to_string(),
            vote,
            voter: voter.into(),
        }
    }

    fn open_round(coordinator: &mut VoteCoordinator, ledger: &Ledger) -> Block {
        assert!(coordinator.begin_mining());
        let block = mined(ledger);
        let actions = coordinator.on_mined(block.clone(), ledger, Duration::ZERO);
        assert_eq!(actions.len(), 2);
        block
    }

    #[test]
    fn test_required_votes() {
        assert_eq!(required_votes(1), 1);
        assert_eq!(required_votes(2), 1);
        assert_eq!(required_votes(3), 2);
        assert_eq!(required_votes(4), 2);
        assert_eq!(required_votes(5), 3);
    }

    #[test]
    fn test_single_flight() {
        let ledger = ledger();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        assert!(coordinator.begin_mining());
        assert!(!coordinator.begin_mining());

        coordinator.on_mined(mined(&ledger), &ledger, Duration::ZERO);
        assert!(coordinator.round().is_some());
        assert!(!coordinator.begin_mining());
    }

    #[test]
    fn test_mining_aborted_frees_slot() {
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        assert!(coordinator.begin_mining());
        coordinator.mining_aborted();
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn test_unmined_block_not_voted() {
        let ledger = Ledger::open(Box::new(MemoryStore::new()), 8).unwrap();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        coordinator.begin_mining();

        let candidate = ledger.candidate(BlockData::new("c1", json!(1)), Utc::now());
        let block = Miner::new().solve(candidate, ledger.difficulty(), || true);
        assert!(coordinator.on_mined(block, &ledger, Duration::ZERO).is_empty());
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn test_three_peers_one_yes_commits() {
        let ledger = ledger();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        let block = open_round(&mut coordinator, &ledger);

        coordinator.on_ballot(ballot(&block.hash, "b", true));
        coordinator.on_ballot(ballot(&block.hash, "c", false));

        assert_eq!(coordinator.finalize(&block.hash, 3), Some(VoteDecision::Commit(block)));
        assert!(!coordinator.is_busy());
    }

    #[test]
    fn test_three_peers_no_yes_rejects() {
        let ledger = ledger();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        let block = open_round(&mut coordinator, &ledger);

        coordinator.on_ballot(ballot(&block.hash, "b", false));
        coordinator.on_ballot(ballot(&block.hash, "c", false));

        let decision = coordinator.finalize(&block.hash, 3);
        assert!(matches!(decision, Some(VoteDecision::Reject { yes: 0, required: 2, .. })));
        assert!(coordinator.round().is_none());
        // Cleared exactly once
        assert_eq!(coordinator.finalize(&block.hash, 3), None);
    }

    #[test]
    fn test_five_peers_needs_two_yes() {
        let ledger = ledger();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        let block = open_round(&mut coordinator, &ledger);

        coordinator.on_ballot(ballot(&block.hash, "b", true));
        coordinator.on_ballot(ballot("other", "c", true));
        assert!(matches!(
            coordinator.finalize(&block.hash, 5),
            Some(VoteDecision::Reject { yes: 1, required: 3, .. })
        ));
    }

    #[test]
    fn test_voter_changes_mind() {
        let ledger = ledger();
        let mut coordinator = VoteCoordinator::new("a".into(), DEADLINE);
        let block = open_round(&mut coordinator, &ledger);

        coordinator.on_ballot(ballot(&block.hash, "b", true));
        coordinator.on_ballot(ballot(&block.hash, "b", false));
        assert_eq!(coordinator.round().map(VoteRound::yes_votes), Some(0));
    }

    #[test]
    fn test_respond_validates_against_head() {
        let mut local = ledger();
        let coordinator = VoteCoordinator::new("b".into(), DEADLINE);

        let block = mined(&local);
        let request = VoteRequest {
            block: block.clone(),
            proposer: "a".into(),
        };

        let approve = coordinator.respond(&request, &local);
        assert!(matches!(&approve, Action::Publish { message, .. } if message.data["vote"] == true));

        local.add_block(block);
        let reject = coordinator.respond(&request, &local);
        assert!(matches!(&reject, Action::Publish { channel: Channel::Vote, message } if message.data["vote"] == false));
    }
}
