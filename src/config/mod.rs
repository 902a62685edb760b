//! Configuration system for psgate.
//!
//! All topic, subscription, and credential identity is carried in this
//! explicit struct tree and handed to the components at construction. There
//! are no process-wide mutable configuration globals.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PsgateConfig {
    /// Gateway HTTP server configuration.
    pub server: ServerConfig,
    /// Broker connection configuration.
    pub broker: BrokerConfig,
    /// Credential sourcing configuration.
    pub credentials: CredentialsConfig,
    /// Publisher configuration.
    pub publish: PublishConfig,
    /// Subscriber configuration.
    pub subscriber: SubscriberConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

/// Gateway HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_address: String,
    /// Gateway port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the Pub/Sub-compatible broker (HTTP/JSON API).
    pub endpoint: String,
    /// Project (namespace) identifier.
    pub project_id: String,
    /// Topic the publisher targets.
    pub topic: String,
    /// Subscription the subscriber consumes.
    pub subscription: String,
    /// Per-RPC timeout in seconds for broker requests. `None` leaves
    /// individual requests unbounded.
    pub request_timeout_secs: Option<u64>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086".to_string(),
            project_id: "local-project".to_string(),
            topic: "psgate-events".to_string(),
            subscription: "psgate-events".to_string(),
            request_timeout_secs: None,
        }
    }
}

/// Credential sourcing configuration.
///
/// Resolution order: `token`, then `token_file`, then the `PSGATE_TOKEN` /
/// `PSGATE_TOKEN_FILE` environment variables, then anonymous mode if
/// `allow_anonymous` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Inline bearer token.
    pub token: Option<String>,
    /// Path to a file holding the bearer token.
    pub token_file: Option<PathBuf>,
    /// Permit unauthenticated channels (emulator or trusted-network brokers).
    pub allow_anonymous: bool,
}

/// Publisher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Upper bound in seconds for the publish acknowledgment wait.
    /// `None` waits indefinitely.
    pub ack_timeout_secs: Option<u64>,
    /// Payload published by the `GET /publish` trigger endpoint.
    pub test_payload: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: None,
            test_payload: "Hello from the psgate publisher!".to_string(),
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Maximum messages requested per pull.
    pub pull_batch_size: u32,
    /// Grace period in seconds that `stop()` waits for in-flight handlers.
    pub grace_period_secs: u64,
    /// Consecutive transient pull failures tolerated before the channel is
    /// declared failed.
    pub max_consecutive_failures: u32,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            pull_batch_size: 10,
            grace_period_secs: 30,
            max_consecutive_failures: 5,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Log format (text or json).
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format enum.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format.
    #[default]
    Text,
    /// JSON format.
    Json,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics on the gateway's `/metrics` route.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl PsgateConfig {
    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&raw)
            .map_err(|e| crate::Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.broker.endpoint.is_empty() {
            return Err(crate::Error::Config("broker.endpoint must be set".into()));
        }
        if !self.broker.endpoint.starts_with("http://") && !self.broker.endpoint.starts_with("https://")
        {
            return Err(crate::Error::Config(format!(
                "broker.endpoint must be an http(s) URL, got {}",
                self.broker.endpoint
            )));
        }
        if self.broker.project_id.is_empty()
            || self.broker.topic.is_empty()
            || self.broker.subscription.is_empty()
        {
            return Err(crate::Error::Config(
                "broker.project_id, broker.topic and broker.subscription must be set".into(),
            ));
        }
        if self.publish.ack_timeout_secs == Some(0) {
            return Err(crate::Error::Config(
                "publish.ack_timeout_secs must be positive; omit it for an unbounded wait".into(),
            ));
        }
        if self.subscriber.pull_batch_size == 0 {
            return Err(crate::Error::Config(
                "subscriber.pull_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}
