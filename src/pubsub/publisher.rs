//! Outbound publisher with per-call channel ownership.

use crate::auth::CredentialProvider;
use crate::channel::{ChannelFactory, TopicRef};
use crate::error::{Error, Result, ValidationError};
use crate::metrics::METRICS;
use crate::types::MessageAttributes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum accepted payload size (10 MB, the Pub/Sub limit).
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Publishes messages to one topic.
///
/// Each `publish` call acquires its own channel and releases it before
/// returning, success or failure. The call blocks (suspends) until the
/// broker acknowledges durable receipt; with `ack_timeout` unset the wait is
/// unbounded. Failed publishes are never retried here; the caller owns that
/// decision.
pub struct Publisher {
    factory: Arc<dyn ChannelFactory>,
    credentials: Arc<CredentialProvider>,
    topic: TopicRef,
    ack_timeout: Option<Duration>,
}

impl Publisher {
    /// Create a publisher bound to `topic`.
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        credentials: Arc<CredentialProvider>,
        topic: TopicRef,
        ack_timeout: Option<Duration>,
    ) -> Self {
        Self {
            factory,
            credentials,
            topic,
            ack_timeout,
        }
    }

    /// The topic this publisher targets.
    pub fn topic(&self) -> &TopicRef {
        &self.topic
    }

    /// Publish one message and return the broker-assigned message ID.
    ///
    /// Fails with [`Error::Auth`] before any network attempt when no
    /// credential resolves, [`Error::Connect`] when the channel cannot be
    /// opened, and [`Error::Publish`] when submission or the acknowledgment
    /// wait fails. On success the returned ID is never empty.
    pub async fn publish(
        &self,
        data: Vec<u8>,
        attributes: MessageAttributes,
    ) -> Result<String> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(Error::Validation(ValidationError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            }));
        }

        let credential = match self.credentials.resolve() {
            Ok(credential) => credential,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        let topic_path = self.topic.path();
        let timer = METRICS
            .publish_latency_seconds
            .with_label_values(&[topic_path.as_str()])
            .start_timer();

        let mut channel = match self
            .factory
            .open_publish_channel(&self.topic, &credential)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        let result = match self.ack_timeout {
            Some(limit) => match tokio::time::timeout(limit, channel.submit(data, attributes))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Publish(format!(
                    "broker did not acknowledge within {:?}",
                    limit
                ))),
            },
            None => channel.submit(data, attributes).await,
        };

        // Release on every exit path. A close failure is logged and must not
        // mask the publish outcome.
        if let Err(e) = channel.close().await {
            warn!(topic = %topic_path, error = %e, "failed to release publish channel");
        }
        drop(timer);

        match result {
            Ok(message_id) if message_id.is_empty() => {
                let error =
                    Error::Publish("broker acknowledged without a message id".to_string());
                self.record_failure(&error);
                Err(error)
            }
            Ok(message_id) => {
                METRICS
                    .messages_published_total
                    .with_label_values(&[topic_path.as_str()])
                    .inc();
                info!(topic = %topic_path, message_id = %message_id, "message published");
                Ok(message_id)
            }
            Err(error) => {
                self.record_failure(&error);
                Err(error)
            }
        }
    }

    fn record_failure(&self, error: &Error) {
        let kind = match error {
            Error::Auth(_) => "auth",
            Error::Connect(_) => "connect",
            Error::Publish(_) => "publish",
            _ => "other",
        };
        METRICS
            .publish_failures_total
            .with_label_values(&[self.topic.path().as_str(), kind])
            .inc();
    }
}
