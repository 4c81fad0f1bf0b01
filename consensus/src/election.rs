//! Leader election state machine
//!
//! A node with no known master opens a round on each failure-detection tick.
//! Every peer answers with a ballot naming the lowest candidate it has seen,
//! so concurrent rounds converge on the lexicographically lowest initiator.
//! A round that collects no majority lapses after a timeout and the next tick
//! starts over.
//!
//! ```text
//!  NoMaster ──tick──► InProgress(round) ──majority for self──► MasterElected(self)
//!     ▲                     │                                        │
//!     │               round timeout                                  │
//!     └─────────────────────┘◄──────── master left ◄─────────────────┘
//!
//!  any state ──MASTER_ANNOUNCEMENT(m)──► MasterElected(m)
//! ```

use crate::messages::{
    publish, Action, ElectionBallot, ElectionRequest, MasterAnnouncement, TimerId,
};
use message_bus::{Channel, EventKind, PeerId};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Election phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionPhase {
    /// No master known, no round pending
    NoMaster,
    /// A round initiated by this node is collecting ballots
    InProgress {
        /// Round identifier
        round_id: Uuid,
    },
    /// A master is known
    MasterElected {
        /// Current master
        master_id: PeerId,
    },
}

/// Externally visible election state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionStatus {
    /// Current master, if any
    pub current_master_id: Option<PeerId>,
    /// True if this node is the master
    pub is_master: bool,
    /// Round this node is running, if any
    pub active_round_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
struct LowestCandidate {
    id: PeerId,
    expires_at: Duration,
}

/// Per-node election state
#[derive(Debug)]
pub struct Election {
    local: PeerId,
    phase: ElectionPhase,
    lowest: Option<LowestCandidate>,
    /// Ballots of the active round, voter -> candidate
    tally: HashMap<PeerId, PeerId>,
    round_timeout: Duration,
    announcements: u64,
}

impl Election {
    /// Fresh state with no master
    pub fn new(local: PeerId, round_timeout: Duration) -> Self {
        Self {
            local,
            phase: ElectionPhase::NoMaster,
            lowest: None,
            tally: HashMap::new(),
            round_timeout,
            announcements: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> &ElectionPhase {
        &self.phase
    }

    /// Current master
    pub fn current_master(&self) -> Option<&PeerId> {
        match &self.phase {
            ElectionPhase::MasterElected { master_id } => Some(master_id),
            _ => None,
        }
    }

    /// True if this node is the master
    pub fn is_master(&self) -> bool {
        self.current_master() == Some(&self.local)
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> ElectionStatus {
        ElectionStatus {
            current_master_id: self.current_master().cloned(),
            is_master: self.is_master(),
            active_round_id: match &self.phase {
                ElectionPhase::InProgress { round_id } => Some(*round_id),
                _ => None,
            },
        }
    }

    /// Failure-detection tick: open a round if no master is known
    pub fn on_tick(&mut self, now: Duration, peer_count: usize) -> Vec<Action> {
        if self.phase != ElectionPhase::NoMaster {
            return Vec::new();
        }

        let round_id = Uuid::new_v4();
        info!(node = %self.local, %round_id, peer_count, "No master, starting election");
        self.phase = ElectionPhase::InProgress { round_id };
        self.tally.clear();

        let local = self.local.clone();
        let own_choice = self.observe_candidate(&local, now);

        let mut actions = vec![
            publish(
                Channel::LeaderElection,
                EventKind::Election,
                &ElectionRequest {
                    candidate_id: self.local.clone(),
                    round_id,
                },
            ),
            Action::SetTimer {
                id: TimerId::ElectionRound(round_id),
                after: self.round_timeout,
            },
        ];

        // Own ballot; a lone node wins on it
        actions.extend(self.count_ballot(round_id, local, own_choice, now, peer_count));
        actions
    }

    /// `ELECTION` from a peer
    pub fn on_request(&mut self, request: &ElectionRequest, now: Duration) -> Vec<Action> {
        if self.is_master() {
            debug!(candidate = %request.candidate_id, "Already master, re-announcing");
            return vec![self.announce()];
        }

        let choice = self.observe_candidate(&request.candidate_id, now);
        debug!(
            round_id = %request.round_id,
            candidate = %request.candidate_id,
            %choice,
            "Answering election"
        );
        vec![publish(
            Channel::LeaderElection,
            EventKind::VoteResponse,
            &ElectionBallot {
                round_id: request.round_id,
                vote: true,
                candidate_id: choice,
                voter: self.local.clone(),
            },
        )]
    }

    /// `VOTE_RESPONSE` on the election channel
    pub fn on_ballot(
        &mut self,
        ballot: ElectionBallot,
        now: Duration,
        peer_count: usize,
    ) -> Vec<Action> {
        if !ballot.vote {
            return Vec::new();
        }
        self.count_ballot(
            ballot.round_id,
            ballot.voter,
            ballot.candidate_id,
            now,
            peer_count,
        )
    }

    /// `MASTER_ANNOUNCEMENT`
    ///
    /// Not last-writer-wins: a sitting master only yields to a lower id and
    /// re-asserts itself against a higher one, so every peer settles on the
    /// same master.
    pub fn on_announcement(&mut self, announcement: &MasterAnnouncement) -> Vec<Action> {
        let master_id = &announcement.master_id;
        if self.is_master() && *master_id > self.local {
            warn!(rival = %master_id, "Competing master announcement, re-asserting");
            return vec![self.announce()];
        }

        if self.current_master() != Some(master_id) {
            info!(node = %self.local, master = %master_id, "Master elected");
        }
        self.phase = ElectionPhase::MasterElected {
            master_id: master_id.clone(),
        };
        self.tally.clear();
        Vec::new()
    }

    /// The round timer fired
    pub fn on_round_timeout(&mut self, round_id: Uuid) {
        if self.phase == (ElectionPhase::InProgress { round_id }) {
            warn!(%round_id, ballots = self.tally.len(), "Election round lapsed without majority");
            self.phase = ElectionPhase::NoMaster;
            self.tally.clear();
        }
    }

    /// A peer disconnected
    pub fn on_peer_left(&mut self, peer: &PeerId) {
        if self.lowest.as_ref().map(|c| &c.id) == Some(peer) {
            self.lowest = None;
        }
        if self.current_master() == Some(peer) {
            warn!(master = %peer, "Master disconnected");
            self.phase = ElectionPhase::NoMaster;
        }
    }

    fn count_ballot(
        &mut self,
        round_id: Uuid,
        voter: PeerId,
        candidate: PeerId,
        now: Duration,
        peer_count: usize,
    ) -> Vec<Action> {
        if self.phase != (ElectionPhase::InProgress { round_id }) {
            debug!(%round_id, %voter, "Ballot for an inactive round");
            return Vec::new();
        }

        self.tally.insert(voter, candidate.clone());
        let votes = self.tally.values().filter(|c| **c == candidate).count();
        let majority = peer_count / 2 + 1;
        debug!(%round_id, %candidate, votes, majority, "Ballot counted");

        if votes < majority {
            return Vec::new();
        }

        let lowest = self.current_lowest(now);
        if candidate == self.local && lowest.as_ref() == Some(&self.local) {
            info!(node = %self.local, votes, peer_count, "Won election");
            self.phase = ElectionPhase::MasterElected {
                master_id: self.local.clone(),
            };
            self.tally.clear();
            vec![self.announce()]
        } else {
            debug!(winner = %candidate, "Majority reached, awaiting announcement");
            Vec::new()
        }
    }

    /// Fold `candidate` into the remembered lowest and return the result
    fn observe_candidate(&mut self, candidate: &PeerId, now: Duration) -> PeerId {
        let lowest = match self.current_lowest(now) {
            Some(current) if current <= *candidate => current,
            _ => candidate.clone(),
        };
        self.lowest = Some(LowestCandidate {
            id: lowest.clone(),
            expires_at: now + self.round_timeout,
        });
        lowest
    }

    fn current_lowest(&self, now: Duration) -> Option<PeerId> {
        self.lowest
            .as_ref()
            .filter(|c| c.expires_at > now)
            .map(|c| c.id.clone())
    }

    fn announce(&mut self) -> Action {
        self.announcements += 1;
        publish(
            Channel::LeaderElection,
            EventKind::MasterAnnouncement,
            &MasterAnnouncement {
                master_id: self.local.clone(),
                seq: self.announcements,
            },
        )
    }
}
