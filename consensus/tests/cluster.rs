//! Protocol scenarios on a simulated cluster

mod common;

use common::{
    default_timings, fresh_ledger, grown_chain, ledger_with, mine_next, quiet_timings, Sim,
};
use consensus::{messages::ChainUpdate, NodeInput};
use ledger_core::{Block, BlockData};
use message_bus::{Channel, Envelope, EventKind, Message, PeerId};
use serde_json::json;
use std::time::Duration;

const NODES: [&str; 3] = ["node-a", "node-b", "node-c"];

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn request(client: &str) -> BlockData {
    BlockData::new(client, json!({"amount": 10}))
}

fn elected_cluster() -> Sim {
    let mut sim = Sim::with_nodes(default_timings(), &NODES, 1);
    sim.run_for(secs(6));
    sim
}

#[test]
fn test_election_converges_on_lowest_id() {
    let sim = elected_cluster();

    let master = PeerId::from("node-a");
    assert!(sim.masters().iter().all(|m| m.as_ref() == Some(&master)));
    assert!(sim.node("node-a").election().is_master());
    assert!(!sim.node("node-b").election().is_master());
    assert!(!sim.node("node-c").election().is_master());
    assert_eq!(sim.sent_kinds(&EventKind::MasterAnnouncement).len(), 1);
}

#[test]
fn test_new_master_after_master_leaves() {
    let mut sim = elected_cluster();
    sim.remove_node("node-a");
    assert!(sim.masters().iter().all(Option::is_none));

    sim.run_for(secs(6));

    let master = PeerId::from("node-b");
    assert!(sim.masters().iter().all(|m| m.as_ref() == Some(&master)));
}

#[test]
fn test_lone_node_elects_itself_and_commits() {
    let mut sim = Sim::with_nodes(default_timings(), &["solo"], 1);
    sim.run_for(secs(6));
    assert!(sim.node("solo").election().is_master());

    sim.create_block("solo", request("c1"));
    sim.run_for(secs(6));

    assert_eq!(sim.len("solo"), 2);
    assert!(!sim.node("solo").votes().is_busy());
}

#[test]
fn test_block_commits_with_one_yes_of_three() {
    let mut sim = Sim::new(quiet_timings());
    sim.add_node("node-a", fresh_ledger(1));
    sim.add_node("node-b", fresh_ledger(1));
    // Already one block ahead, so it votes no
    sim.add_node("node-c", ledger_with(grown_chain(1, "other", 1)));
    let diverged_head = sim.head("node-c");

    sim.create_block("node-a", request("c1"));
    assert!(sim.node("node-a").votes().is_busy());
    let ballots = sim.sent_kinds(&EventKind::VoteResponse);
    assert_eq!(ballots.len(), 2);
    assert!(ballots.iter().any(|b| b.from.as_str() == "node-b" && b.data["vote"] == json!(true)));
    assert!(ballots.iter().any(|b| b.from.as_str() == "node-c" && b.data["vote"] == json!(false)));

    sim.run_for(secs(6));

    assert_eq!(sim.len("node-a"), 2);
    assert_eq!(sim.head("node-a"), sim.head("node-b"));
    assert_eq!(sim.head("node-c"), diverged_head);
    assert_eq!(sim.sent_kinds(&EventKind::AddBlock).len(), 1);
    assert!(!sim.node("node-a").votes().is_busy());
}

#[test]
fn test_block_rejected_without_quorum() {
    let mut sim = Sim::new(quiet_timings());
    sim.add_node("node-a", fresh_ledger(1));
    sim.add_node("node-b", ledger_with(grown_chain(1, "other", 1)));
    sim.add_node("node-c", ledger_with(grown_chain(1, "other", 1)));

    sim.create_block("node-a", request("c1"));
    sim.run_for(secs(6));

    assert_eq!(sim.len("node-a"), 1);
    assert!(sim.sent_kinds(&EventKind::AddBlock).is_empty());
    assert!(!sim.node("node-a").votes().is_busy());
}

#[test]
fn test_second_request_dropped_while_busy() {
    let mut sim = Sim::with_nodes(quiet_timings(), &NODES, 1);

    sim.create_block("node-a", request("c1"));
    sim.create_block("node-a", request("c2"));
    assert_eq!(sim.sent_kinds(&EventKind::VoteRequest).len(), 1);

    sim.run_for(secs(6));
    assert_eq!(sim.len("node-a"), 2);

    // Free again once the round closed
    sim.create_block("node-a", request("c3"));
    sim.run_for(secs(6));
    assert_eq!(sim.len("node-a"), 3);
    assert_eq!(sim.head("node-a"), sim.head("node-c"));
}

#[test]
fn test_duplicate_add_block_applied_once() {
    let mut sim = Sim::with_nodes(quiet_timings(), &NODES, 1);
    let block = mine_next(&fresh_ledger(1), request("c1"));
    let message = Message::with_payload(EventKind::AddBlock, &block).unwrap();

    let envelope = sim.inject("node-b", Channel::Blockchain, "node-a", message);
    sim.deliver("node-b", Channel::Blockchain, "node-a", envelope.clone());
    assert_eq!(sim.len("node-b"), 2);

    // Past the dedup window the block is recognised as already present
    sim.run_for(secs(16));
    assert!(sim.node("node-b").dedup().lock().is_empty());
    sim.deliver("node-b", Channel::Blockchain, "node-a", envelope);
    assert_eq!(sim.len("node-b"), 2);
    assert_eq!(sim.node("node-b").ledger().chain().latest(), &block);
}

#[test]
fn test_create_block_reaches_every_node() {
    let mut sim = elected_cluster();

    sim.create_block("node-b", request("c1"));
    sim.run_for(secs(6));

    for id in NODES {
        assert_eq!(sim.len(id), 2, "{id}");
    }
    assert_eq!(sim.head("node-a"), sim.head("node-b"));
    assert_eq!(sim.head("node-b"), sim.head("node-c"));
    let head: &Block = sim.node("node-c").ledger().chain().latest();
    assert_eq!(head.payload.client_id, "c1");
}

#[test]
fn test_gossiped_create_block_settles_on_one_block() {
    let mut sim = elected_cluster();
    let message = Message::with_payload(EventKind::CreateBlock, &request("relay-client")).unwrap();
    let envelope = Envelope::wrap(message).unwrap();
    for id in NODES {
        sim.deliver(id, Channel::Blockchain, "relay", envelope.clone());
    }
    assert_eq!(sim.sent_kinds(&EventKind::VoteRequest).len(), 3);

    sim.run_for(secs(6));

    assert_eq!(sim.sent_kinds(&EventKind::AddBlock).len(), 1);
    for id in NODES {
        assert_eq!(sim.len(id), 2, "{id}");
        assert!(!sim.node(id).votes().is_busy(), "{id}");
    }
    assert_eq!(sim.head("node-a"), sim.head("node-b"));
    assert_eq!(sim.head("node-b"), sim.head("node-c"));
}

#[test]
fn test_mine_block_is_alias_for_create_block() {
    let mut sim = Sim::with_nodes(quiet_timings(), &NODES, 1);
    let message = Message::with_payload(EventKind::MineBlock, &request("c1")).unwrap();
    sim.inject("node-a", Channel::Blockchain, "relay", message);
    sim.run_for(secs(6));

    assert_eq!(sim.len("node-a"), 2);
    assert_eq!(sim.len("node-b"), 2);
}

#[test]
fn test_unknown_kind_is_ignored() {
    let mut sim = Sim::with_nodes(quiet_timings(), &NODES, 1);
    let message = Message::new(EventKind::Other("FOO".to_string()), json!({"x": 1}));
    let envelope = Envelope::wrap(message).unwrap();

    let actions = sim.handle_direct(
        "node-a",
        NodeInput::Envelope {
            channel: Channel::Blockchain,
            from: PeerId::from("node-b"),
            envelope,
        },
    );

    assert!(actions.is_empty());
    assert_eq!(sim.len("node-a"), 1);
}

#[test]
fn test_chain_update_only_accepted_from_master() {
    let mut sim = elected_cluster();
    let longer = grown_chain(1, "x", 2);
    let update = |master: &str, seq| ChainUpdate {
        snapshot: longer.snapshot(),
        master: PeerId::from(master),
        seq,
    };

    let forged = Message::with_payload(EventKind::BlockchainUpdate, &update("node-c", 1)).unwrap();
    sim.inject("node-b", Channel::Blockchain, "node-c", forged);
    assert_eq!(sim.len("node-b"), 1);

    let genuine = Message::with_payload(EventKind::BlockchainUpdate, &update("node-a", 7)).unwrap();
    sim.inject("node-b", Channel::Blockchain, "node-a", genuine);
    assert_eq!(sim.node("node-b").ledger().chain(), &longer);
}

#[test]
fn test_master_snapshot_overrides_divergent_follower() {
    let mut sim = Sim::new(default_timings());
    sim.add_node("node-a", fresh_ledger(1));
    sim.add_node("node-b", fresh_ledger(1));
    sim.add_node("node-c", ledger_with(grown_chain(1, "other", 3)));

    sim.run_for(secs(6));

    assert!(sim.node("node-a").election().is_master());
    assert_eq!(sim.len("node-c"), 1);
    assert_eq!(sim.head("node-c"), sim.head("node-a"));
}

#[test]
fn test_conflicting_add_block_triggers_sync() {
    let mut sim = elected_cluster();
    let ahead = grown_chain(1, "x", 3);
    let orphan = ahead.blocks()[3].clone();
    let updates_before = sim.sent_kinds(&EventKind::BlockchainUpdate).len();

    let message = Message::with_payload(EventKind::AddBlock, &orphan).unwrap();
    sim.inject("node-c", Channel::Blockchain, "node-b", message);

    let requests = sim.sent_kinds(&EventKind::RequestSyncBlockchainServer);
    assert!(requests.iter().any(|r| r.from.as_str() == "node-c" && r.data["requester"] == json!("node-c")));
    let updates = sim.sent_kinds(&EventKind::BlockchainUpdate);
    assert_eq!(updates.len(), updates_before + 1);
    assert_eq!(updates.last().unwrap().from.as_str(), "node-a");
    assert_eq!(sim.len("node-c"), 1);
}

#[test]
fn test_late_joiner_syncs_from_master() {
    let mut sim = elected_cluster();
    sim.create_block("node-b", request("c1"));
    sim.run_for(secs(6));
    assert_eq!(sim.len("node-a"), 2);

    sim.add_node("node-d", fresh_ledger(1));
    sim.run_for(secs(11));

    assert_eq!(
        sim.node("node-d").election().current_master(),
        Some(&PeerId::from("node-a"))
    );
    assert_eq!(sim.node("node-d").ledger().chain(), sim.node("node-a").ledger().chain());
}

#[test]
fn test_sync_request_answered_only_by_master() {
    let mut sim = elected_cluster();
    let before = sim.sent_kinds(&EventKind::Blockchain).len();

    let observer = Message::new(EventKind::RequestSyncBlockchain, json!({}));
    let envelope = Envelope::wrap(observer).unwrap();
    sim.deliver("node-b", Channel::Blockchain, "observer", envelope.clone());
    assert_eq!(sim.sent_kinds(&EventKind::Blockchain).len(), before);

    sim.deliver("node-a", Channel::Blockchain, "observer", envelope);
    let sent = sim.sent_kinds(&EventKind::Blockchain);
    assert_eq!(sent.len(), before + 1);
    assert_eq!(sent.last().unwrap().data["master"], json!("node-a"));
    assert_eq!(sent.last().unwrap().data["chain"].as_array().map(Vec::len), Some(1));
}

#[test]
fn test_vote_request_for_stale_block_gets_no() {
    let mut sim = Sim::with_nodes(quiet_timings(), &NODES, 1);
    sim.create_block("node-a", request("c1"));
    sim.run_for(secs(6));

    // Built on genesis, which is no longer the head anywhere
    let stale = mine_next(&fresh_ledger(1), request("late"));
    let message = Message::with_payload(
        EventKind::VoteRequest,
        &consensus::messages::VoteRequest {
            block: stale.clone(),
            proposer: PeerId::from("node-c"),
        },
    )
    .unwrap();
    sim.inject("node-b", Channel::Vote, "node-c", message);

    let reply = sim.sent_kinds(&EventKind::VoteResponse).into_iter().last().cloned().unwrap();
    assert_eq!(reply.from.as_str(), "node-b");
    assert_eq!(reply.data["blockHash"], json!(stale.hash));
    assert_eq!(reply.data["vote"], json!(false));
}
