//! Deterministic multi-node simulation
//!
//! Controllers are driven directly: a simulated clock, FIFO gossip to every
//! other node, and synchronous mining. Timers due at the same instant fire in
//! the order they were set.

#![allow(dead_code)]

use consensus::{Action, NodeController, NodeInput, PeerView, ProtocolTimings, TimerId};
use ledger_core::{Block, BlockData, Chain, Ledger, MemoryStore, Miner};
use message_bus::{Channel, DedupCache, Envelope, EventKind, Message, PeerId};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Peer count shared by every simulated node
pub struct LivePeers(Arc<AtomicUsize>);

impl PeerView for LivePeers {
    fn peer_count(&self, _channel: Channel) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

enum Work {
    Deliver {
        to: PeerId,
        channel: Channel,
        from: PeerId,
        envelope: Envelope,
    },
    Local {
        to: PeerId,
        input: NodeInput,
    },
}

struct Timer {
    due: Duration,
    seq: u64,
    node: PeerId,
    id: TimerId,
}

/// Published message, as seen by the simulated network
#[derive(Debug, Clone)]
pub struct Sent {
    pub from: PeerId,
    pub channel: Channel,
    pub kind: EventKind,
    pub data: serde_json::Value,
}

pub struct Sim {
    nodes: BTreeMap<PeerId, NodeController>,
    queue: VecDeque<Work>,
    timers: Vec<Timer>,
    seq: u64,
    now: Duration,
    live: Arc<AtomicUsize>,
    timings: ProtocolTimings,
    pub sent: Vec<Sent>,
}

/// Protocol defaults
pub fn default_timings() -> ProtocolTimings {
    ProtocolTimings::default()
}

/// Timings with elections and resync pushed out of the way
pub fn quiet_timings() -> ProtocolTimings {
    ProtocolTimings {
        election_tick: Duration::from_secs(3600),
        startup_sync_delay: Duration::from_secs(3600),
        ..ProtocolTimings::default()
    }
}

/// Genesis-only ledger in memory
pub fn fresh_ledger(difficulty: usize) -> Ledger {
    Ledger::open(Box::new(MemoryStore::new()), difficulty).unwrap()
}

/// Chain of `extra` mined blocks on top of genesis, tagged with `client`
pub fn grown_chain(difficulty: usize, client: &str, extra: usize) -> Chain {
    let mut ledger = fresh_ledger(difficulty);
    for n in 0..extra {
        let block = mine_next(&ledger, BlockData::new(client, serde_json::json!(n)));
        assert!(ledger.add_block(block));
    }
    ledger.chain().clone()
}

/// Ledger preloaded with `chain`
pub fn ledger_with(chain: Chain) -> Ledger {
    let difficulty = chain.difficulty();
    Ledger::open(Box::new(MemoryStore::with_chain(chain)), difficulty).unwrap()
}

/// Mine a block extending `ledger`'s head
pub fn mine_next(ledger: &Ledger, data: BlockData) -> Block {
    let candidate = ledger.candidate(data, chrono::Utc::now());
    Miner::new().solve(candidate, ledger.difficulty(), || false)
}

impl Sim {
    pub fn new(timings: ProtocolTimings) -> Self {
        Self {
            nodes: BTreeMap::new(),
            queue: VecDeque::new(),
            timers: Vec::new(),
            seq: 0,
            now: Duration::ZERO,
            live: Arc::new(AtomicUsize::new(0)),
            timings,
            sent: Vec::new(),
        }
    }

    /// Cluster of genesis-only nodes
    pub fn with_nodes(timings: ProtocolTimings, ids: &[&str], difficulty: usize) -> Self {
        let mut sim = Self::new(timings);
        for id in ids {
            sim.add_node(id, fresh_ledger(difficulty));
        }
        sim
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn add_node(&mut self, id: &str, ledger: Ledger) {
        let id = PeerId::from(id);
        let peers: Arc<dyn PeerView> = Arc::new(LivePeers(Arc::clone(&self.live)));
        let mut controller = NodeController::new(
            id.clone(),
            ledger,
            peers,
            DedupCache::new().shared(),
            self.timings,
        );
        self.live.fetch_add(1, Ordering::SeqCst);

        for other in self.nodes.keys() {
            self.queue.push_back(Work::Local {
                to: other.clone(),
                input: NodeInput::PeerJoined(id.clone()),
            });
        }

        controller.set_time(self.now);
        let actions = controller.start();
        self.nodes.insert(id.clone(), controller);
        self.apply(&id, actions);
        self.drain();
    }

    pub fn remove_node(&mut self, id: &str) {
        let id = PeerId::from(id);
        if self.nodes.remove(&id).is_none() {
            return;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.timers.retain(|t| t.node != id);
        for other in self.nodes.keys() {
            self.queue.push_back(Work::Local {
                to: other.clone(),
                input: NodeInput::PeerLeft(id.clone()),
            });
        }
        self.drain();
    }

    pub fn node(&self, id: &str) -> &NodeController {
        &self.nodes[&PeerId::from(id)]
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.nodes.keys().cloned().collect()
    }

    /// Masters as seen by each node
    pub fn masters(&self) -> Vec<Option<PeerId>> {
        self.nodes
            .values()
            .map(|n| n.election().current_master().cloned())
            .collect()
    }

    pub fn head(&self, id: &str) -> String {
        self.node(id).ledger().head_hash().to_string()
    }

    pub fn len(&self, id: &str) -> usize {
        self.node(id).ledger().chain().len()
    }

    /// Local block request
    pub fn create_block(&mut self, id: &str, data: BlockData) {
        self.queue.push_back(Work::Local {
            to: PeerId::from(id),
            input: NodeInput::CreateBlock(data),
        });
        self.drain();
    }

    /// Wrap `message` and deliver it to `to` as if `from` had gossiped it
    pub fn inject(&mut self, to: &str, channel: Channel, from: &str, message: Message) -> Envelope {
        let envelope = Envelope::wrap(message).unwrap();
        self.deliver(to, channel, from, envelope.clone());
        envelope
    }

    /// Deliver a ready envelope and settle the network
    pub fn deliver(&mut self, to: &str, channel: Channel, from: &str, envelope: Envelope) {
        self.queue.push_back(Work::Deliver {
            to: PeerId::from(to),
            channel,
            from: PeerId::from(from),
            envelope,
        });
        self.drain();
    }

    /// Feed an input straight into one controller, returning its actions
    pub fn handle_direct(&mut self, id: &str, input: NodeInput) -> Vec<Action> {
        let now = self.now;
        let node = self.nodes.get_mut(&PeerId::from(id)).unwrap();
        node.set_time(now);
        node.handle(input)
    }

    /// Advance the clock by `span`, firing timers and settling gossip
    pub fn run_for(&mut self, span: Duration) {
        let target = self.now + span;
        self.drain();

        loop {
            let next = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.due <= target)
                .min_by_key(|(_, t)| (t.due, t.seq))
                .map(|(i, _)| i);

            let Some(index) = next else { break };
            let timer = self.timers.swap_remove(index);
            self.now = timer.due;
            self.queue.push_back(Work::Local {
                to: timer.node,
                input: NodeInput::Timer(timer.id),
            });
            self.drain();
        }

        self.now = target;
    }

    pub fn sent_kinds(&self, kind: &EventKind) -> Vec<&Sent> {
        self.sent.iter().filter(|s| &s.kind == kind).collect()
    }

    fn drain(&mut self) {
        while let Some(work) = self.queue.pop_front() {
            let (to, input) = match work {
                Work::Deliver {
                    to,
                    channel,
                    from,
                    envelope,
                } => (
                    to,
                    NodeInput::Envelope {
                        channel,
                        from,
                        envelope,
                    },
                ),
                Work::Local { to, input } => (to, input),
            };

            let now = self.now;
            let Some(node) = self.nodes.get_mut(&to) else {
                continue;
            };
            node.set_time(now);
            let actions = node.handle(input);
            self.apply(&to, actions);
        }
    }

    fn apply(&mut self, id: &PeerId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Publish { channel, message } => {
                    let envelope = Envelope::wrap(message).unwrap();
                    let admitted = self.nodes[id].dedup().lock().admit(&envelope.id);
                    if !admitted {
                        continue;
                    }
                    self.sent.push(Sent {
                        from: id.clone(),
                        channel,
                        kind: envelope.kind.clone(),
                        data: envelope.data.clone(),
                    });
                    for other in self.nodes.keys().filter(|other| *other != id) {
                        self.queue.push_back(Work::Deliver {
                            to: other.clone(),
                            channel,
                            from: id.clone(),
                            envelope: envelope.clone(),
                        });
                    }
                }
                Action::SetTimer { id: timer, after } => {
                    self.seq += 1;
                    self.timers.push(Timer {
                        due: self.now + after,
                        seq: self.seq,
                        node: id.clone(),
                        id: timer,
                    });
                }
                Action::Mine {
                    candidate,
                    difficulty,
                } => {
                    let block = Miner::new().solve(candidate, difficulty, || false);
                    self.queue.push_back(Work::Local {
                        to: id.clone(),
                        input: NodeInput::BlockMined(block),
                    });
                }
            }
        }
    }
}
