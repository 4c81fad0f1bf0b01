//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    /// Total envelopes published, by outcome
    pub static ref MESSAGE_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_publish_total",
        "Total envelopes published",
        &["channel", "status"]
    )
    .unwrap();

    /// Publish attempts, including retries
    pub static ref MESSAGE_PUBLISH_ATTEMPTS: IntCounterVec = register_int_counter_vec!(
        "message_bus_publish_attempts_total",
        "Publish attempts including retries",
        &["channel"]
    )
    .unwrap();

    /// Total envelopes received, by outcome
    pub static ref MESSAGE_RECEIVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_receive_total",
        "Total envelopes received",
        &["kind", "status"]
    )
    .unwrap();
}

/// Count an inbound envelope
pub fn record_receive(kind: &str, status: &str) {
    MESSAGE_RECEIVE_TOTAL.with_label_values(&[kind, status]).inc();
}
