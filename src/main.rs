//! Command-line interface for the provisioning broker
//!
//! # Usage Examples
//!
//! ```bash
//! # Publish with SCRAM over TLS
//! KAFKA_SASL_PASSWORD=secret provisioning-broker \
//!   --kafka-brokers kafka-1:9093,kafka-2:9093 \
//!   --kafka-ca-cert /etc/kafka/ca.pem \
//!   --kafka-sasl-mechanism scram-sha-512 --kafka-sasl-username svc \
//!   send --topic platform.provisioning.internal.availability-check --value '{}'
//!
//! # Consume without a broker (no-op transport)
//! provisioning-broker --noop consume --topic anything
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use provisioning_broker::{
    connect, message_handler, parse_header, render_message, GenericMessage, MessageHeader,
};
use provisioning_kafka::BrokerConfig;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "provisioning-broker")]
#[command(about = "Publish and consume provisioning messages")]
#[command(long_about = None)]
struct Cli {
    /// Kafka connection options
    #[command(flatten)]
    kafka: BrokerConfig,

    /// Use the no-op broker instead of Kafka
    #[arg(long, global = true)]
    noop: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message
    Send {
        /// Destination topic
        #[arg(long)]
        topic: String,

        /// Partition key (default: empty)
        #[arg(long, default_value = "")]
        key: String,

        /// Message payload
        #[arg(long)]
        value: String,

        /// Header in name=value form (repeatable)
        #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
        headers: Vec<MessageHeader>,
    },

    /// Print new messages as JSON lines until interrupted
    Consume {
        /// Topic to subscribe to
        #[arg(long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let broker = connect(&cli.kafka, cli.noop).context("unable to initialize kafka")?;

    match cli.command {
        Commands::Send {
            topic,
            key,
            value,
            headers,
        } => {
            let mut message = GenericMessage::new(topic, value.into_bytes()).with_key(key.into_bytes());
            message.headers = headers;

            broker
                .send(vec![message])
                .await
                .context("Failed to send message")?;
            tracing::info!("Message sent");
        }
        Commands::Consume { topic } => {
            let cancel = CancellationToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupted, stopping consumer");
                        cancel.cancel();
                    }
                });
            }

            let handler = message_handler(|message: GenericMessage| async move {
                println!("{}", render_message(&message));
            });
            broker
                .consume(&topic, cancel, handler)
                .await
                .with_context(|| format!("Failed to consume from {topic}"))?;
        }
    }

    Ok(())
}
