//! Client-side connection descriptors.
//!
//! A broker owns two descriptors built from the same security artifacts: one
//! for long-lived subscribe sessions and one for short-lived publish sessions.
//! Building them performs no network I/O.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::RDKafkaLogLevel;
use rdkafka::ClientConfig;

use crate::config::{BrokerConfig, CLIENT_ID, DIAL_TIMEOUT};
use crate::security::{SaslMechanism, Security, TlsContext};

/// Group id required by librdkafka for explicit partition assignment. Readers
/// never subscribe or commit, so the group is never joined.
pub const READER_GROUP_ID: &str = "provisioning-backend-reader";

/// What a descriptor is used to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Subscribe,
    Publish,
}

/// Immutable description of how to reach and authenticate to the brokers.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    role: Role,
    bootstrap_servers: String,
    security: Security,
    client_id: String,
    dial_timeout: Duration,
}

impl ConnectionDescriptor {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Bootstrap broker addresses in configuration order
    pub fn brokers(&self) -> Vec<String> {
        self.bootstrap_servers.split(',').map(str::to_string).collect()
    }

    pub fn tls(&self) -> Option<&TlsContext> {
        self.security.tls.as_ref()
    }

    pub fn sasl(&self) -> Option<&Arc<SaslMechanism>> {
        self.security.sasl.as_ref()
    }

    /// librdkafka configuration for a client of this role
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("client.id", &self.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.dial_timeout.as_millis().to_string(),
            )
            .set("security.protocol", self.security.protocol())
            // Log lines are queued and served by the client's poll loop, which
            // hands them to the client context instead of stderr
            .set("log.queue", "true")
            .set_log_level(RDKafkaLogLevel::Info);

        if let Some(tls) = &self.security.tls {
            config.set("ssl.ca.pem", tls.ca_pem());
        }

        if let Some(sasl) = &self.security.sasl {
            config
                .set("sasl.mechanisms", sasl.name())
                .set("sasl.username", sasl.username())
                .set("sasl.password", sasl.password());
        }

        match self.role {
            Role::Subscribe => {
                // Partitions are assigned explicitly; nothing is committed
                config
                    .set("group.id", READER_GROUP_ID)
                    .set("enable.auto.commit", "false")
                    .set("enable.auto.offset.store", "false")
                    .set("enable.partition.eof", "false");
            }
            Role::Publish => {
                config.set("message.timeout.ms", self.dial_timeout.as_millis().to_string());
            }
        }

        config
    }
}

/// The pair of descriptors a broker needs.
#[derive(Debug, Clone)]
pub struct Connections {
    pub subscribe: ConnectionDescriptor,
    pub publish: ConnectionDescriptor,
}

impl Connections {
    pub fn new(config: &BrokerConfig, security: Security) -> Self {
        let descriptor = |role: Role| ConnectionDescriptor {
            role,
            bootstrap_servers: config.bootstrap_servers(),
            security: security.clone(),
            client_id: CLIENT_ID.to_string(),
            dial_timeout: DIAL_TIMEOUT,
        };

        Self {
            subscribe: descriptor(Role::Subscribe),
            publish: descriptor(Role::Publish),
        }
    }
}
