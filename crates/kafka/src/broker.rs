//! The broker contract shared by every transport variant.
//!
//! Variants only provide the two session constructors, [`Broker::open_reader`]
//! and [`Broker::open_writer`]. The consume loop and the batched send are
//! written once on top of them, so the ordering, cancellation and batch rules
//! hold for every variant.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kafka_types::{from_wire, to_wire, GenericMessage};
use rdkafka::message::{Message, OwnedMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, ReadError, Result};

/// Delay between attempts to open a reader after a transient failure.
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Callback invoked for every consumed message.
pub type MessageHandler =
    Arc<dyn Fn(GenericMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure into a [`MessageHandler`]
pub fn message_handler<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(GenericMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(handler(message)))
}

/// A subscribe session bound to one topic.
///
/// The session is released when the reader is dropped.
#[async_trait]
pub trait MessageReader: Send {
    async fn read_message(&mut self) -> std::result::Result<OwnedMessage, ReadError>;
}

/// A publish session; the topic is taken from each message.
///
/// The session is released when the writer is dropped.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_messages(&mut self, messages: Vec<OwnedMessage>) -> Result<()>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a subscribe session on `topic`, starting at the newest offset.
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn MessageReader>>;

    /// Open a publish session not bound to any topic.
    async fn open_writer(&self) -> Result<Box<dyn MessageWriter>>;

    /// Deliver every new message on `topic` to `handler` until the stream ends
    /// or `cancel` fires.
    ///
    /// Blocks for the life of the subscription, so run it in its own task.
    /// Transient failures to open the reader are logged and retried every
    /// [`REOPEN_BACKOFF`]; any other open failure is returned. Read errors are
    /// logged and the loop carries on.
    async fn consume(
        &self,
        topic: &str,
        cancel: CancellationToken,
        handler: MessageHandler,
    ) -> Result<()> {
        let open = async {
            loop {
                match self.open_reader(topic).await {
                    Ok(reader) => return Ok(reader),
                    Err(e) if e.is_transient() => {
                        warn!(kafka = true, topic, error = %e, "Cannot open reader, retrying");
                        tokio::time::sleep(REOPEN_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(kafka = true, topic, "Cancelled before the reader was opened");
                return Ok(());
            }
            reader = open => reader?,
        };
        consume_loop(reader, topic, &cancel, &handler).await;
        Ok(())
    }

    /// Publish a batch of messages sharing one topic in a single call.
    ///
    /// An empty batch is a no-op. A batch with more than one topic is rejected
    /// before any session is opened.
    async fn send(&self, messages: Vec<GenericMessage>) -> Result<()> {
        let Some(first) = messages.first() else {
            return Ok(());
        };
        check_common_topic(&first.topic, &messages)?;

        let batch: Vec<OwnedMessage> = messages.iter().map(to_wire).collect();
        let mut writer = self.open_writer().await?;
        writer.write_messages(batch).await
    }
}

fn check_common_topic(topic: &str, messages: &[GenericMessage]) -> Result<()> {
    match messages.iter().find(|message| message.topic != topic) {
        Some(other) => Err(Error::DifferentTopics {
            expected: topic.to_string(),
            found: other.topic.clone(),
        }),
        None => Ok(()),
    }
}

/// Read messages one at a time and hand each to `handler`, waiting for it to
/// finish before the next read. Takes ownership of the reader and drops it on
/// return.
pub async fn consume_loop(
    mut reader: Box<dyn MessageReader>,
    topic: &str,
    cancel: &CancellationToken,
    handler: &MessageHandler,
) {
    debug!(kafka = true, topic, "Starting consume loop");

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReadError::Cancelled),
            result = reader.read_message() => result,
        };

        match result {
            Ok(message) => {
                trace!(
                    kafka = true,
                    topic,
                    key = %String::from_utf8_lossy(message.key().unwrap_or_default()),
                    payload_len = message.payload().map_or(0, <[u8]>::len),
                    "Received message"
                );
                handler(from_wire(&message)).await;
            }
            Err(e) if e.is_terminal() => {
                debug!(kafka = true, topic, reason = %e, "Stopping consume loop");
                break;
            }
            Err(e) => {
                warn!(kafka = true, topic, error = %e, "Error when reading message");
            }
        }
    }
}
