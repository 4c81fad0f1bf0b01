//! Peer transport abstraction
//!
//! The gossip substrate itself lives outside this crate. A node only needs
//! to subscribe to channels, publish bytes, and ask how many remote peers
//! currently listen on a channel.

use crate::types::{Channel, PeerId};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Event delivered by a transport to its node
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Payload published by a remote peer
    Message {
        /// Channel it was published on
        channel: Channel,
        /// Publishing peer
        from: PeerId,
        /// Raw envelope bytes
        payload: Bytes,
    },
    /// A remote peer connected
    PeerJoined(PeerId),
    /// A remote peer disconnected
    PeerLeft(PeerId),
}

/// Broadcast transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity of the local peer
    fn local_peer_id(&self) -> &PeerId;

    /// Start receiving messages published on `channel`
    async fn subscribe(&self, channel: Channel) -> Result<()>;

    /// Deliver `payload` to every remote subscriber of `channel`
    async fn publish(&self, channel: Channel, payload: Bytes) -> Result<()>;

    /// Remote peers subscribed to `channel`, excluding the local peer
    fn subscriber_count(&self, channel: Channel) -> usize;
}
