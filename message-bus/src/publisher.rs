//! Envelope publisher with fixed-delay retry, and the per-node outbox

use crate::{
    dedup::SharedDedup,
    message::{Envelope, Message},
    metrics::{MESSAGE_PUBLISH_ATTEMPTS, MESSAGE_PUBLISH_TOTAL},
    transport::Transport,
    types::Channel,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Publisher configuration
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Attempts before a message is dropped
    pub max_attempts: u32,

    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Message publisher
///
/// Outbound ids are recorded in the shared dedup cache so the node ignores
/// its own traffic when gossip echoes it back.
pub struct Publisher {
    transport: Arc<dyn Transport>,
    dedup: SharedDedup,
    config: PublisherConfig,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("peer", self.transport.local_peer_id())
            .field("config", &self.config)
            .finish()
    }
}

impl Publisher {
    /// Create new publisher
    pub fn new(transport: Arc<dyn Transport>, dedup: SharedDedup, config: PublisherConfig) -> Self {
        Self {
            transport,
            dedup,
            config,
        }
    }

    /// Envelope `message` and record its id.
    ///
    /// Returns `None` if the id was already seen or the payload could not be
    /// encoded.
    pub fn prepare(&self, message: Message) -> Option<Envelope> {
        let envelope = match Envelope::wrap(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to envelope message: {}", e);
                return None;
            }
        };

        if !self.dedup.lock().admit(&envelope.id) {
            trace!(id = %envelope.id, kind = %envelope.kind, "Already seen, not publishing");
            return None;
        }
        Some(envelope)
    }

    /// Transmit a prepared envelope, retrying while nobody listens.
    ///
    /// Never fails: exhausting the attempts is logged and reported as false.
    pub async fn deliver(&self, channel: Channel, envelope: &Envelope) -> bool {
        let payload = match envelope.to_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!("Failed to serialize envelope {}: {}", envelope.id, e);
                MESSAGE_PUBLISH_TOTAL.with_label_values(&[channel.as_str(), "error"]).inc();
                return false;
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            MESSAGE_PUBLISH_ATTEMPTS.with_label_values(&[channel.as_str()]).inc();

            let subscribers = self.transport.subscriber_count(channel);
            if subscribers == 0 {
                warn!(%channel, kind = %envelope.kind, attempt, "No peers subscribed to channel");
            } else {
                match self.transport.publish(channel, payload.clone()).await {
                    Ok(()) => {
                        if attempt > 1 {
                            info!(%channel, kind = %envelope.kind, attempt, "Published after retry");
                        } else {
                            debug!(%channel, kind = %envelope.kind, subscribers, "Published");
                        }
                        MESSAGE_PUBLISH_TOTAL.with_label_values(&[channel.as_str(), "success"]).inc();
                        return true;
                    }
                    Err(e) => {
                        error!(%channel, kind = %envelope.kind, attempt, "Publish failed: {}", e);
                    }
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        warn!(
            %channel,
            kind = %envelope.kind,
            attempts = max_attempts,
            "Giving up on message"
        );
        MESSAGE_PUBLISH_TOTAL.with_label_values(&[channel.as_str(), "dropped"]).inc();
        false
    }

    /// Prepare and deliver in one go
    pub async fn publish(&self, channel: Channel, message: Message) -> bool {
        match self.prepare(message) {
            Some(envelope) => self.deliver(channel, &envelope).await,
            None => false,
        }
    }
}

/// Handle to a node's outbox task
///
/// Messages are enveloped and deduplicated on the caller's side, then
/// delivered in order by a single background task.
#[derive(Debug, Clone)]
pub struct OutboxHandle {
    publisher: Arc<Publisher>,
    tx: mpsc::UnboundedSender<(Channel, Envelope)>,
}

impl OutboxHandle {
    /// Queue `message` on `channel`. Returns false if it was a duplicate or
    /// the outbox has stopped.
    pub fn send(&self, channel: Channel, message: Message) -> bool {
        match self.publisher.prepare(message) {
            Some(envelope) => self.tx.send((channel, envelope)).is_ok(),
            None => false,
        }
    }
}

/// Start the outbox task for `publisher`.
///
/// The task ends once every [`OutboxHandle`] is dropped and the queue is
/// drained.
pub fn spawn_outbox(publisher: Publisher) -> (OutboxHandle, JoinHandle<()>) {
    let publisher = Arc::new(publisher);
    let (tx, mut rx) = mpsc::unbounded_channel::<(Channel, Envelope)>();

    let worker = Arc::clone(&publisher);
    let task = tokio::spawn(async move {
        while let Some((channel, envelope)) = rx.recv().await {
            worker.deliver(channel, &envelope).await;
        }
        debug!("Outbox stopped");
    });

    (OutboxHandle { publisher, tx }, task)
}
