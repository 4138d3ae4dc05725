//! Broker variant that talks to nothing.

use async_trait::async_trait;
use rdkafka::message::OwnedMessage;
use tracing::debug;

use crate::broker::{Broker, MessageReader, MessageWriter};
use crate::error::{ReadError, Result};

/// Readers end immediately, writers drop every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBroker;

#[async_trait]
impl Broker for NoopBroker {
    async fn open_reader(&self, topic: &str) -> Result<Box<dyn MessageReader>> {
        debug!(kafka = true, topic, "Opened noop reader");
        Ok(Box::new(NoopReader))
    }

    async fn open_writer(&self) -> Result<Box<dyn MessageWriter>> {
        Ok(Box::new(NoopWriter))
    }
}

struct NoopReader;

#[async_trait]
impl MessageReader for NoopReader {
    async fn read_message(&mut self) -> std::result::Result<OwnedMessage, ReadError> {
        Err(ReadError::EndOfStream)
    }
}

struct NoopWriter;

#[async_trait]
impl MessageWriter for NoopWriter {
    async fn write_messages(&mut self, messages: Vec<OwnedMessage>) -> Result<()> {
        debug!(kafka = true, count = messages.len(), "Discarded messages");
        Ok(())
    }
}
