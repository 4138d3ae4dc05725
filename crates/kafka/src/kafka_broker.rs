//! Production broker backed by librdkafka.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::bindings::rd_kafka_set_log_queue;
use rdkafka::client::{Client, ClientContext};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer, PurgeConfig};
use rdkafka::types::RDKafkaRespErr;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::OnceCell;
use tracing::{debug, Span};

use crate::broker::{Broker, MessageReader, MessageWriter};
use crate::config::BrokerConfig;
use crate::connection::Connections;
use crate::context::BrokerContext;
use crate::error::{Error, ReadError, Result};
use crate::security::{Security, TlsContext};

/// Kafka broker holding the negotiated connection descriptors.
///
/// Construct once at startup and share (`Arc<dyn Broker>`) with every
/// component that publishes or consumes.
pub struct KafkaBroker {
    connections: Connections,
    span: Span,
    tls_verified: OnceCell<()>,
}

impl KafkaBroker {
    /// Build the security artifacts and connection descriptors.
    ///
    /// Fails on any configuration error; no network I/O happens here.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        config.validate()?;
        let security = Security::from_config(config)?;
        let connections = Connections::new(config, security);

        debug!(
            kafka = true,
            brokers = %config.bootstrap_servers(),
            tls = connections.subscribe.tls().is_some(),
            sasl = connections.subscribe.sasl().map(|sasl| sasl.name()),
            "Kafka broker initialized"
        );

        Ok(Self {
            connections,
            span: Span::current(),
            tls_verified: OnceCell::new(),
        })
    }

    /// Route connection-level diagnostics through `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    fn context(&self) -> BrokerContext {
        BrokerContext::new(self.span.clone())
    }

    /// Check once per broker that the bootstrap brokers negotiate TLS 1.3
    /// against the configured roots before librdkafka opens a session.
    ///
    /// librdkafka speaks TLS through OpenSSL and has no minimum version
    /// setting. A failed check is not cached.
    async fn verify_tls(&self) -> Result<()> {
        let Some(tls) = self.connections.subscribe.tls() else {
            return Ok(());
        };

        self.tls_verified
            .get_or_try_init(|| {
                let tls = tls.clone();
                let brokers = self.connections.subscribe.brokers();
                let timeout = self.connections.subscribe.dial_timeout();
                let span = self.span.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        let _entered = span.enter();
                        verify_brokers(&tls, &brokers, timeout)
                    })
                    .await
                    .map_err(|e| Error::Transport(format!("TLS verification task failed: {e}")))?
                }
            })
            .await?;
        Ok(())
    }
}

/// Every reachable broker must pass; at least one must be reachable.
fn verify_brokers(tls: &TlsContext, brokers: &[String], timeout: Duration) -> Result<()> {
    let mut unreachable = None;
    let mut verified = 0;
    for broker in brokers {
        match tls.verify_broker(broker, timeout) {
            Ok(()) => {
                debug!(kafka = true, broker = %broker, "Broker negotiated TLS 1.3");
                verified += 1;
            }
            Err(Error::Transport(reason)) => {
                debug!(kafka = true, broker = %broker, %reason, "Skipping unreachable broker");
                unreachable = Some(reason);
            }
            Err(e) => return Err(e),
        }
    }

    if verified == 0 {
        return Err(Error::Transport(
            unreachable.unwrap_or_else(|| "no brokers configured".to_string()),
        ));
    }
    Ok(())
}

/// Forward librdkafka's log queue to the client's main queue, where the
/// client's poll loop hands each line to [`BrokerContext`].
fn route_logs<C: ClientContext>(client: &Client<C>) -> Result<()> {
    // SAFETY: the native handle is owned by `client` and stays valid for the
    // duration of the call. A null queue selects the main queue.
    let err = unsafe { rd_kafka_set_log_queue(client.native_ptr(), std::ptr::null_mut()) };
    if err != RDKafkaRespErr::RD_KAFKA_RESP_ERR_NO_ERROR {
        return Err(Error::Kafka(KafkaError::ClientCreation(format!(
            "cannot route client logs: {err:?}"
        ))));
    }
    Ok(())
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn MessageReader>> {
        self.verify_tls().await?;

        let descriptor = &self.connections.subscribe;
        let consumer: StreamConsumer<BrokerContext> = descriptor
            .client_config()
            .create_with_context(self.context())?;
        route_logs(consumer.client())?;

        let timeout = descriptor.dial_timeout();
        let owned_topic = topic.to_string();
        let (consumer, partitions) = tokio::task::spawn_blocking(move || {
            let partitions = topic_partitions(&consumer, &owned_topic, timeout);
            (consumer, partitions)
        })
        .await
        .map_err(|e| Error::Transport(format!("metadata lookup for {topic} failed: {e}")))?;
        let partitions = partitions?;

        let mut assignment = TopicPartitionList::new();
        for partition in &partitions {
            assignment.add_partition_offset(topic, *partition, Offset::End)?;
        }
        consumer.assign(&assignment)?;

        debug!(kafka = true, topic, ?partitions, "Opened reader at the latest offset");
        Ok(Box::new(KafkaReader { consumer }))
    }

    async fn open_writer(&self) -> Result<Box<dyn MessageWriter>> {
        self.verify_tls().await?;

        let descriptor = &self.connections.publish;
        let producer: FutureProducer<BrokerContext> = descriptor
            .client_config()
            .create_with_context(self.context())?;
        route_logs(producer.client())?;

        Ok(Box::new(KafkaWriter { producer }))
    }
}

fn topic_partitions(
    consumer: &StreamConsumer<BrokerContext>,
    topic: &str,
    timeout: Duration,
) -> Result<Vec<i32>> {
    let metadata = consumer
        .fetch_metadata(Some(topic), timeout)
        .map_err(|e| Error::Transport(format!("metadata for topic {topic} unavailable: {e}")))?;
    let mut partitions = Vec::new();
    for topic_metadata in metadata.topics() {
        if let Some(err) = topic_metadata.error() {
            return Err(Error::Transport(format!(
                "metadata for topic {topic} returned {err:?}"
            )));
        }
        partitions.extend(topic_metadata.partitions().iter().map(|p| p.id()));
    }
    if partitions.is_empty() {
        return Err(Error::Transport(format!("topic {topic} has no partitions")));
    }
    Ok(partitions)
}

struct KafkaReader {
    consumer: StreamConsumer<BrokerContext>,
}

#[async_trait]
impl MessageReader for KafkaReader {
    async fn read_message(&mut self) -> std::result::Result<OwnedMessage, ReadError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(message.detach()),
            Err(KafkaError::Canceled) => Err(ReadError::EndOfStream),
            Err(e) => Err(ReadError::Transport(e.to_string())),
        }
    }
}

struct KafkaWriter {
    producer: FutureProducer<BrokerContext>,
}

#[async_trait]
impl MessageWriter for KafkaWriter {
    async fn write_messages(&mut self, messages: Vec<OwnedMessage>) -> Result<()> {
        let mut deliveries = Vec::with_capacity(messages.len());
        for message in &messages {
            let mut record = FutureRecord::<[u8], [u8]>::to(message.topic())
                .key(message.key().unwrap_or_default())
                .payload(message.payload().unwrap_or_default());
            if let Some(headers) = message.headers() {
                record = record.headers(headers.clone());
            }
            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((e, _)) => {
                    // Drop the records already queued from this batch
                    self.producer.purge(PurgeConfig::default().queue());
                    return Err(Error::Send(e));
                }
            }
        }

        for delivery in join_all(deliveries).await {
            match delivery {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => return Err(Error::Send(e)),
                Err(_) => return Err(Error::Send(KafkaError::Canceled)),
            }
        }

        debug!(kafka = true, count = messages.len(), "Published messages");
        Ok(())
    }
}
