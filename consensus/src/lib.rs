//! Gossip Blockchain Node
//!
//! Keeps locally mined, hash-linked chains loosely consistent across a peer
//! group.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Gossip Transport                    │
//! │   blockchain | leader-election | vote               │
//! └────────────────────┬────────────────────────────────┘
//!                      │ envelopes (dedup by content id)
//!                      ↓
//! ┌─────────────────────────────────────────────────────┐
//! │                 Node Controller                      │
//! │  Election  →  master   |  Vote  →  commit / reject  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//!                      ↓
//! ┌─────────────────────────────────────────────────────┐
//! │                   Ledger Core                        │
//! │  Chain + validation + proof-of-work + storage       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! - **Election**: lowest initiator wins a majority, then announces itself
//! - **Admission**: a mined block is committed when `yes + 1 >= ceil(n/2)`
//! - **Sync**: the master's snapshot is the canonical chain
//!
//! Best-effort eventual consistency among honest, mostly-connected peers.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod controller;
pub mod election;
pub mod error;
pub mod messages;
pub mod relay;
pub mod runner;
pub mod vote;

// Re-exports
pub use config::{Config, ProtocolTimings};
pub use controller::{NodeController, NodeStatus};
pub use election::{Election, ElectionPhase, ElectionStatus};
pub use error::{Error, Result};
pub use messages::{Action, NodeInput, PeerView, TimerId, TransportPeers};
pub use relay::CommandRelay;
pub use runner::{spawn_node, NodeHandle};
pub use vote::{required_votes, VoteCoordinator, VoteDecision, VoteRound};
