//! Gossip message bus
//!
//! Provides broadcast messaging with:
//! - Content-addressed envelopes
//! - A periodically wiped dedup cache shared by receive and send paths
//! - Fixed-delay retry while a channel has no subscribers
//! - A pluggable [`Transport`] with an in-memory implementation
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod dedup;
pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod transport;
pub mod types;

pub use dedup::{DedupCache, SharedDedup};
pub use error::{Error, Result};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::{Envelope, Message};
pub use publisher::{spawn_outbox, OutboxHandle, Publisher, PublisherConfig};
pub use transport::{Transport, TransportEvent};
pub use types::{Channel, EventKind, PeerId};
