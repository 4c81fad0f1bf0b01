//! Command relay
//!
//! Publishes block-creation requests from an outside client onto the
//! blockchain channel, where every node picks them up.

use ledger_core::BlockData;
use message_bus::{
    Channel, DedupCache, EventKind, Message, Publisher, PublisherConfig, Transport,
};
use std::sync::Arc;

/// Publisher of `CREATE_BLOCK` / `MINE_BLOCK` commands
#[derive(Debug)]
pub struct CommandRelay {
    publisher: Publisher,
}

impl CommandRelay {
    /// Relay over `transport`
    pub fn new(transport: Arc<dyn Transport>, config: PublisherConfig) -> Self {
        Self {
            publisher: Publisher::new(transport, DedupCache::new().shared(), config),
        }
    }

    /// Publish `CREATE_BLOCK`. Returns false if nobody received it.
    pub async fn create_block(&self, data: BlockData) -> bool {
        self.send(EventKind::CreateBlock, data).await
    }

    /// Publish `MINE_BLOCK`
    pub async fn mine_block(&self, data: BlockData) -> bool {
        self.send(EventKind::MineBlock, data).await
    }

    async fn send(&self, kind: EventKind, data: BlockData) -> bool {
        let message = match Message::with_payload(kind, &data) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to encode block request: {}", e);
                return false;
            }
        };
        tracing::debug!(client = %data.client_id, kind = %message.kind, "Relaying block request");
        self.publisher.publish(Channel::Blockchain, message).await
    }
}
