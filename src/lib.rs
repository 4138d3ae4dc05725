//! Provisioning broker
//!
//! Messaging layer of the provisioning backend. The application obtains one
//! [`Broker`] at startup and passes it to every component that publishes or
//! consumes messages.
//!
//! # Crates
//!
//! - `kafka_types` - [`GenericMessage`] and its Kafka wire mapping
//! - `provisioning_kafka` - TLS/SASL negotiation, connection descriptors and
//!   the [`Broker`] implementations
//!
//! # CLI Usage
//!
//! ```bash
//! # Publish a message
//! provisioning-broker --kafka-brokers localhost:9092 send \
//!   --topic platform.sources.event-stream --key 42 --value '{"id":1}' \
//!   --header event_type=Application.create
//!
//! # Print new messages until Ctrl-C
//! provisioning-broker --kafka-brokers localhost:9092 consume \
//!   --topic platform.sources.event-stream
//! ```

use std::sync::Arc;

pub use kafka_types::{GenericMessage, MessageHeader};
pub use provisioning_kafka::{
    message_handler, Broker, BrokerConfig, Error, KafkaBroker, MessageHandler, NoopBroker,
};

/// Construct the broker selected by configuration.
///
/// Configuration errors abort here; no partially initialized broker is
/// returned.
pub fn connect(config: &BrokerConfig, noop: bool) -> provisioning_kafka::Result<Arc<dyn Broker>> {
    if noop {
        return Ok(Arc::new(NoopBroker));
    }
    Ok(Arc::new(KafkaBroker::new(config)?))
}

/// Parse a `name=value` header argument
pub fn parse_header(arg: &str) -> Result<MessageHeader, String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(MessageHeader::new(name, value)),
        _ => Err(format!("invalid header {arg:?}, expected name=value")),
    }
}

/// Render a message as one JSON object for line-oriented output.
///
/// Key, value and header values are decoded lossily as UTF-8. Headers are an
/// array of `[name, value]` pairs so repeated names and their order survive.
pub fn render_message(message: &GenericMessage) -> serde_json::Value {
    let headers: Vec<serde_json::Value> = message
        .headers
        .iter()
        .map(|header| serde_json::json!([header.key, String::from_utf8_lossy(&header.value)]))
        .collect();

    serde_json::json!({
        "topic": message.topic,
        "key": String::from_utf8_lossy(&message.key),
        "value": String::from_utf8_lossy(&message.value),
        "headers": headers,
    })
}
