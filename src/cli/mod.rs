// CLI module for psgate
/// Command execution handlers
pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface for psgate
#[derive(Parser)]
#[command(name = "psgate")]
#[command(author, version, about = "Pub/Sub gateway - publish trigger endpoint and managed subscriber", long_about = None)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Parse arguments from the process command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Broker and credential flags shared by all commands
#[derive(Debug, clap::Args)]
pub struct BrokerArgs {
    /// Path to a TOML configuration file
    #[arg(long, env = "PSGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Broker base URL
    #[arg(long, env = "PSGATE_BROKER_ENDPOINT")]
    pub broker_endpoint: Option<String>,

    /// Project (namespace) identifier
    #[arg(long, env = "PSGATE_PROJECT")]
    pub project: Option<String>,

    /// Topic to publish to
    #[arg(long, env = "PSGATE_TOPIC")]
    pub topic: Option<String>,

    /// Subscription to consume from
    #[arg(long, env = "PSGATE_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Inline bearer token
    #[arg(long, env = "PSGATE_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to a file holding the bearer token
    #[arg(long)]
    pub token_file: Option<PathBuf>,

    /// Permit unauthenticated channels (emulators, trusted networks)
    #[arg(long)]
    pub allow_anonymous: bool,

    /// Upper bound in seconds for the publish acknowledgment wait
    #[arg(long, env = "PSGATE_ACK_TIMEOUT_SECS")]
    pub ack_timeout_secs: Option<u64>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway server and subscriber
    Start {
        /// Broker and credential options
        #[command(flatten)]
        broker: BrokerArgs,

        /// Bind address (use 0.0.0.0 for all interfaces)
        #[arg(long, env = "PSGATE_BIND_ADDRESS")]
        bind_address: Option<String>,

        /// Gateway port
        #[arg(long, env = "PSGATE_PORT")]
        port: Option<u16>,

        /// Grace period in seconds for subscriber shutdown
        #[arg(long, env = "PSGATE_GRACE_PERIOD_SECS")]
        grace_period_secs: Option<u64>,
    },

    /// Publish a single message and exit
    Publish {
        /// Broker and credential options
        #[command(flatten)]
        broker: BrokerArgs,

        /// Message payload
        #[arg(long, short)]
        message: String,

        /// Message attribute as KEY=VALUE (repeatable)
        #[arg(long = "attribute", value_parser = parse_key_val)]
        attributes: Vec<(String, String)>,
    },
}

/// Parse a KEY=VALUE attribute argument
fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("source=gateway").unwrap(),
            ("source".to_string(), "gateway".to_string())
        );
        assert_eq!(
            parse_key_val("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_val("no-equals").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_cli_parses_start() {
        let cli = Cli::try_parse_from([
            "psgate",
            "start",
            "--broker-endpoint",
            "http://localhost:8086",
            "--project",
            "local-project",
            "--topic",
            "events",
            "--subscription",
            "events",
            "--allow-anonymous",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Start { .. }));
    }

    #[test]
    fn test_cli_parses_publish_with_attributes() {
        let cli = Cli::try_parse_from([
            "psgate",
            "publish",
            "--message",
            "hello",
            "--attribute",
            "k=v",
            "--attribute",
            "k2=v2",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish { attributes, .. } => assert_eq!(attributes.len(), 2),
            _ => panic!("expected publish command"),
        }
    }
}
