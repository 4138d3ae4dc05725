//! Connection security: TLS root of trust and SASL mechanism selection.
//!
//! Both artifacts are built once from [`BrokerConfig`] and are immutable
//! afterwards, so every connection the process opens shares them.

use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, ProtocolVersion, RootCertStore};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};

/// Trust context built from a PEM CA bundle, restricted to TLS 1.3.
#[derive(Clone)]
pub struct TlsContext {
    ca_path: PathBuf,
    ca_pem: String,
    roots: Arc<RootCertStore>,
    client_config: Arc<ClientConfig>,
}

impl TlsContext {
    /// Read and parse a PEM CA bundle.
    ///
    /// A missing, unreadable or certificate-free file is an error: falling back
    /// to the system defaults would silently trust more than configured.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|source| Error::ReadCaCert {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(path, &pem)
    }

    fn from_pem(path: &Path, pem: &[u8]) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidCaCert {
            path: path.to_path_buf(),
            reason,
        };

        let mut roots = RootCertStore::empty();
        let mut certs = Vec::new();
        for cert in CertificateDer::pem_slice_iter(pem) {
            let cert = cert.map_err(|e| invalid(format!("malformed PEM: {e:?}")))?;
            roots
                .add(cert.clone())
                .map_err(|e| invalid(format!("rejected certificate: {e}")))?;
            certs.push(cert);
        }
        if roots.is_empty() {
            return Err(invalid("no certificates found".to_string()));
        }

        let roots = Arc::new(roots);
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let client_config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(Arc::clone(&roots))
            .with_no_client_auth();

        Ok(Self {
            ca_path: path.to_path_buf(),
            ca_pem: encode_pem(&certs),
            roots,
            client_config: Arc::new(client_config),
        })
    }

    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    /// The accepted certificates, re-encoded as a PEM bundle
    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// rustls client configuration trusting only the configured roots
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Complete a TLS handshake with `broker` (`host:port`) using
    /// [`TlsContext::client_config`].
    ///
    /// Succeeds only when the broker presents a certificate chaining to the
    /// configured roots over TLS 1.3. A broker that cannot be reached yields
    /// [`Error::Transport`]; a failed or downgraded handshake yields
    /// [`Error::TlsHandshake`].
    pub fn verify_broker(&self, broker: &str, timeout: Duration) -> Result<()> {
        let handshake_failed = |reason: String| Error::TlsHandshake {
            broker: broker.to_string(),
            reason,
        };

        let host = broker
            .rsplit_once(':')
            .map_or(broker, |(host, _)| host)
            .trim_start_matches('[')
            .trim_end_matches(']');
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::InvalidConfig(format!("invalid broker host {host}: {e}")))?;

        let mut socket = dial(broker, timeout)?;
        let mut session = ClientConnection::new(self.client_config(), server_name)?;
        while session.is_handshaking() {
            session
                .complete_io(&mut socket)
                .map_err(|e| handshake_failed(e.to_string()))?;
        }

        match session.protocol_version() {
            Some(ProtocolVersion::TLSv1_3) => {
                session.send_close_notify();
                let _ = session.complete_io(&mut socket);
                Ok(())
            }
            other => Err(handshake_failed(format!("negotiated {other:?}"))),
        }
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("ca_path", &self.ca_path)
            .field("roots", &self.roots.len())
            .finish()
    }
}

fn encode_pem(certs: &[CertificateDer<'_>]) -> String {
    let mut pem = String::new();
    for cert in certs {
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        for (i, c) in STANDARD.encode(cert.as_ref()).chars().enumerate() {
            if i > 0 && i % 64 == 0 {
                pem.push('\n');
            }
            pem.push(c);
        }
        pem.push_str("\n-----END CERTIFICATE-----\n");
    }
    pem
}

fn dial(broker: &str, timeout: Duration) -> Result<TcpStream> {
    let unreachable = |e: io::Error| Error::Transport(format!("cannot reach {broker}: {e}"));

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for addr in broker.to_socket_addrs().map_err(unreachable)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(socket) => {
                socket.set_read_timeout(Some(timeout)).map_err(unreachable)?;
                socket.set_write_timeout(Some(timeout)).map_err(unreachable)?;
                return Ok(socket);
            }
            Err(e) => last_error = e,
        }
    }
    Err(unreachable(last_error))
}

/// SASL authentication mechanism negotiated when a connection is opened.
#[derive(Clone, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain { username: String, password: String },
    ScramSha256 { username: String, password: String },
    ScramSha512 { username: String, password: String },
}

impl SaslMechanism {
    /// Select a mechanism by name, case-insensitively.
    pub fn from_name(name: &str, username: &str, password: &str) -> Result<Self> {
        let username = username.to_string();
        let password = password.to_string();
        match name.to_ascii_lowercase().as_str() {
            "plain" => Ok(SaslMechanism::Plain { username, password }),
            "scram-sha-256" => {
                check_scram_credentials("scram-sha-256", &username, &password)?;
                Ok(SaslMechanism::ScramSha256 { username, password })
            }
            "scram-sha-512" => {
                check_scram_credentials("scram-sha-512", &username, &password)?;
                Ok(SaslMechanism::ScramSha512 { username, password })
            }
            _ => Err(Error::UnknownSaslMechanism(name.to_string())),
        }
    }

    /// Mechanism name as librdkafka spells it
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Plain { .. } => "PLAIN",
            SaslMechanism::ScramSha256 { .. } => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 { .. } => "SCRAM-SHA-512",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            SaslMechanism::Plain { username, .. }
            | SaslMechanism::ScramSha256 { username, .. }
            | SaslMechanism::ScramSha512 { username, .. } => username,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            SaslMechanism::Plain { password, .. }
            | SaslMechanism::ScramSha256 { password, .. }
            | SaslMechanism::ScramSha512 { password, .. } => password,
        }
    }
}

impl fmt::Debug for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslMechanism")
            .field("name", &self.name())
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

// SASLprep prohibits control characters in both fields, and the SCRAM
// exchange cannot carry an empty username.
fn check_scram_credentials(mechanism: &str, username: &str, password: &str) -> Result<()> {
    let fail = |reason: &str| Error::Scram {
        mechanism: mechanism.to_string(),
        reason: reason.to_string(),
    };
    if username.is_empty() {
        return Err(fail("username must not be empty"));
    }
    if username.chars().any(char::is_control) {
        return Err(fail("username contains prohibited characters"));
    }
    if password.chars().any(char::is_control) {
        return Err(fail("password contains prohibited characters"));
    }
    Ok(())
}

/// Security artifacts shared by every connection of a broker.
#[derive(Debug, Clone, Default)]
pub struct Security {
    pub tls: Option<TlsContext>,
    pub sasl: Option<Arc<SaslMechanism>>,
}

impl Security {
    /// Build the TLS context and SASL mechanism described by the configuration.
    pub fn from_config(config: &BrokerConfig) -> Result<Self> {
        let tls = config
            .ca_cert_path()
            .map(|path| TlsContext::from_pem_file(&path))
            .transpose()?;

        let sasl = config
            .sasl()
            .map(|sasl| SaslMechanism::from_name(sasl.mechanism, sasl.username, sasl.password))
            .transpose()?
            .map(Arc::new);

        Ok(Self { tls, sasl })
    }

    /// librdkafka `security.protocol` for this combination
    pub fn protocol(&self) -> &'static str {
        match (self.tls.is_some(), self.sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }
}
