//! Routes librdkafka diagnostics into the caller-supplied tracing span.

use rdkafka::client::ClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use tracing::{debug, warn, Span};

/// rdkafka client context shared by readers and writers of one broker.
#[derive(Clone)]
pub struct BrokerContext {
    span: Span,
}

impl BrokerContext {
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl ClientContext for BrokerContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, log_message: &str) {
        let _entered = self.span.enter();
        match level {
            RDKafkaLogLevel::Emerg
            | RDKafkaLogLevel::Alert
            | RDKafkaLogLevel::Critical
            | RDKafkaLogLevel::Error
            | RDKafkaLogLevel::Warning => {
                warn!(kafka = true, facility = fac, "{log_message}");
            }
            RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info | RDKafkaLogLevel::Debug => {
                debug!(kafka = true, facility = fac, "{log_message}");
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let _entered = self.span.enter();
        warn!(kafka = true, error = %error, "{reason}");
    }
}

impl ConsumerContext for BrokerContext {}
