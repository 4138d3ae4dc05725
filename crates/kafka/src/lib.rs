//! Messaging broker layer of the provisioning backend.
//!
//! Wraps Kafka so the rest of the application sends and receives
//! [`GenericMessage`]s without knowing about connections, TLS or SASL.
//!
//! # Example
//!
//! ```no_run
//! use provisioning_kafka::{message_handler, Broker, BrokerConfig, KafkaBroker};
//! use kafka_types::GenericMessage;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> provisioning_kafka::Result<()> {
//! let config = BrokerConfig::new(["localhost:9092"]).with_sasl("scram-sha-512", "svc", "secret");
//! let broker = std::sync::Arc::new(KafkaBroker::new(&config)?);
//!
//! broker
//!     .send(vec![GenericMessage::new("sources", b"{}".to_vec())])
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! let consumer = {
//!     let broker = broker.clone();
//!     let cancel = cancel.clone();
//!     tokio::spawn(async move {
//!         let handler = message_handler(|message: GenericMessage| async move {
//!             tracing::info!(topic = %message.topic, "received");
//!         });
//!         broker.consume("sources", cancel, handler).await
//!     })
//! };
//!
//! cancel.cancel();
//! consumer.await.expect("consumer task panicked")?;
//! # Ok(())
//! # }
//! ```

/// Broker trait, reader/writer seams and the shared consume/send logic
pub mod broker;
pub mod config;

/// Subscribe and publish connection descriptors
pub mod connection;
pub mod context;
pub mod error;

/// librdkafka-backed broker
pub mod kafka_broker;
pub mod noop;

/// TLS trust context and SASL mechanism selection
pub mod security;

// Re-export main types for easy access
pub use broker::{
    consume_loop, message_handler, Broker, MessageHandler, MessageReader, MessageWriter,
    REOPEN_BACKOFF,
};
pub use config::{BrokerConfig, SaslConfig, CLIENT_ID, DIAL_TIMEOUT};
pub use connection::{ConnectionDescriptor, Connections, Role, READER_GROUP_ID};
pub use error::{Error, ReadError, Result};
pub use kafka_broker::KafkaBroker;
pub use kafka_types::{GenericMessage, MessageHeader};
pub use noop::NoopBroker;
pub use security::{SaslMechanism, Security, TlsContext};
