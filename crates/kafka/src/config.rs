//! Broker configuration, read once when the broker is constructed.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use clap::Args;

use crate::error::{Error, Result};

/// Client identifier attached to every connection for server-side attribution.
pub const CLIENT_ID: &str = concat!("provisioning-backend/", env!("CARGO_PKG_VERSION"));

/// Timeout for establishing a broker connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the Kafka broker.
#[derive(Clone, Args)]
pub struct BrokerConfig {
    /// Kafka brokers (comma-separated or multiple --kafka-brokers)
    #[arg(long = "kafka-brokers", env = "KAFKA_BROKERS", value_delimiter = ',')]
    pub brokers: Vec<String>,

    /// Path to a PEM-encoded CA bundle; enables TLS when set
    #[arg(long = "kafka-ca-cert", env = "KAFKA_CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// SASL mechanism: plain, scram-sha-256 or scram-sha-512
    #[arg(long = "kafka-sasl-mechanism", env = "KAFKA_SASL_MECHANISM")]
    pub sasl_mechanism: Option<String>,

    /// SASL username
    #[arg(long = "kafka-sasl-username", env = "KAFKA_SASL_USERNAME", default_value = "")]
    pub sasl_username: String,

    /// SASL password
    #[arg(
        long = "kafka-sasl-password",
        env = "KAFKA_SASL_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub sasl_password: String,
}

/// SASL settings borrowed from a [`BrokerConfig`].
#[derive(Clone, Copy)]
pub struct SaslConfig<'a> {
    pub mechanism: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl BrokerConfig {
    /// Plaintext, unauthenticated configuration for the given brokers
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            ca_cert: None,
            sasl_mechanism: None,
            sasl_username: String::new(),
            sasl_password: String::new(),
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    pub fn with_sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl_mechanism = Some(mechanism.into());
        self.sasl_username = username.into();
        self.sasl_password = password.into();
        self
    }

    /// Reject an empty broker list or blank entries.
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one kafka broker address is required".to_string(),
            ));
        }
        if self.brokers.iter().any(|broker| broker.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "blank kafka broker address in {:?}",
                self.brokers
            )));
        }
        Ok(())
    }

    /// Broker list in the form librdkafka expects
    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|broker| broker.trim())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// CA bundle path, lexically cleaned. `None` when TLS is not configured.
    pub fn ca_cert_path(&self) -> Option<PathBuf> {
        self.ca_cert
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .map(clean_path)
    }

    /// SASL block, `None` when no mechanism name is configured
    pub fn sasl(&self) -> Option<SaslConfig<'_>> {
        self.sasl_mechanism
            .as_deref()
            .filter(|mechanism| !mechanism.is_empty())
            .map(|mechanism| SaslConfig {
                mechanism,
                username: &self.sasl_username,
                password: &self.sasl_password,
            })
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("brokers", &self.brokers)
            .field("ca_cert", &self.ca_cert)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &"<redacted>")
            .finish()
    }
}

/// Lexically normalise a path: drop `.` segments, fold `..` into its parent
/// where possible and collapse repeated separators.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => cleaned.push(".."),
            },
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}
