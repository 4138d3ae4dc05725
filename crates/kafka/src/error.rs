use std::path::PathBuf;

use rdkafka::error::KafkaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to read kafka CA cert {}: {source}", path.display())]
    ReadCaCert {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid kafka CA cert {}: {reason}", path.display())]
    InvalidCaCert { path: PathBuf, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("TLS 1.3 handshake with {broker} failed: {reason}")]
    TlsHandshake { broker: String, reason: String },

    #[error("unknown SASL mechanism: {0}")]
    UnknownSaslMechanism(String),

    #[error("unable to create {mechanism} mechanism: {reason}")]
    Scram { mechanism: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("messages in batch have different topics: expected {expected}, found {found}")]
    DifferentTopics { expected: String, found: String },

    #[error("cannot send kafka message(s): {0}")]
    Send(KafkaError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed read on a subscribe session.
///
/// `EndOfStream` and `Cancelled` stop a consume loop cleanly, `Transport` is
/// logged and the loop keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("end of stream")]
    EndOfStream,

    #[error("read cancelled")]
    Cancelled,

    #[error("Error when reading message: {0}")]
    Transport(String),
}

impl ReadError {
    /// Whether the consume loop should stop on this error
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadError::EndOfStream | ReadError::Cancelled)
    }
}
