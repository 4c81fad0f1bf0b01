//! In-process gossip network
//!
//! Every joined peer gets a [`MemoryTransport`] and a receiver of
//! [`TransportEvent`]s. Publishing fans a payload out to the other peers
//! subscribed to the channel; the publisher never hears its own message.

use crate::{
    transport::{Transport, TransportEvent},
    types::{Channel, PeerId},
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default per-peer inbox capacity
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

struct PeerSlot {
    inbox: mpsc::Sender<TransportEvent>,
    channels: HashSet<Channel>,
}

/// Shared in-memory network
#[derive(Clone)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<PeerId, PeerSlot>>>,
    inbox_capacity: usize,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("peers", &self.peers.lock().len())
            .field("inbox_capacity", &self.inbox_capacity)
            .finish()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    /// Create an empty network with a custom inbox size
    pub fn with_inbox_capacity(inbox_capacity: usize) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    /// Attach a peer. The other peers receive [`TransportEvent::PeerJoined`].
    ///
    /// Joining again under the same id replaces the previous attachment.
    pub fn join(&self, id: impl Into<PeerId>) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let id = id.into();
        let (tx, rx) = mpsc::channel(self.inbox_capacity);

        let others = {
            let mut peers = self.peers.lock();
            peers.insert(
                id.clone(),
                PeerSlot {
                    inbox: tx,
                    channels: HashSet::new(),
                },
            );
            Self::inboxes_except(&peers, &id)
        };

        tracing::info!(peer = %id, "Peer joined memory network");
        for inbox in others {
            if inbox.try_send(TransportEvent::PeerJoined(id.clone())).is_err() {
                tracing::warn!(peer = %id, "Dropped join notification");
            }
        }

        let transport = MemoryTransport {
            id,
            network: self.clone(),
        };
        (transport, rx)
    }

    /// Detach a peer. The remaining peers receive [`TransportEvent::PeerLeft`].
    pub fn leave(&self, id: &PeerId) {
        let others = {
            let mut peers = self.peers.lock();
            if peers.remove(id).is_none() {
                return;
            }
            Self::inboxes_except(&peers, id)
        };

        tracing::info!(peer = %id, "Peer left memory network");
        for inbox in others {
            if inbox.try_send(TransportEvent::PeerLeft(id.clone())).is_err() {
                tracing::warn!(peer = %id, "Dropped leave notification");
            }
        }
    }

    /// Currently attached peers
    pub fn peers(&self) -> Vec<PeerId> {
        let mut ids: Vec<_> = self.peers.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn inboxes_except(
        peers: &HashMap<PeerId, PeerSlot>,
        id: &PeerId,
    ) -> Vec<mpsc::Sender<TransportEvent>> {
        peers
            .iter()
            .filter(|(peer, _)| *peer != id)
            .map(|(_, slot)| slot.inbox.clone())
            .collect()
    }
}

/// One peer's view of a [`MemoryNetwork`]
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Detach from the network
    pub fn leave(&self) {
        self.network.leave(&self.id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.id
    }

    async fn subscribe(&self, channel: Channel) -> Result<()> {
        let mut peers = self.network.peers.lock();
        let slot = peers
            .get_mut(&self.id)
            .ok_or_else(|| Error::NotConnected(self.id.clone()))?;
        slot.channels.insert(channel);
        tracing::debug!(peer = %self.id, %channel, "Subscribed");
        Ok(())
    }

    async fn publish(&self, channel: Channel, payload: Bytes) -> Result<()> {
        let targets: Vec<_> = {
            let peers = self.network.peers.lock();
            if !peers.contains_key(&self.id) {
                return Err(Error::NotConnected(self.id.clone()));
            }
            peers
                .iter()
                .filter(|(peer, slot)| **peer != self.id && slot.channels.contains(&channel))
                .map(|(peer, slot)| (peer.clone(), slot.inbox.clone()))
                .collect()
        };

        for (peer, inbox) in targets {
            let event = TransportEvent::Message {
                channel,
                from: self.id.clone(),
                payload: payload.clone(),
            };
            // A closed inbox means the peer is shutting down
            if inbox.send(event).await.is_err() {
                tracing::debug!(%peer, %channel, "Peer inbox closed");
            }
        }
        Ok(())
    }

    fn subscriber_count(&self, channel: Channel) -> usize {
        self.network
            .peers
            .lock()
            .iter()
            .filter(|(peer, slot)| **peer != self.id && slot.channels.contains(&channel))
            .count()
    }
}
