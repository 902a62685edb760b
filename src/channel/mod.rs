//! Channel seam between the messaging core and the broker transport.
//!
//! Refs name a destination or consumption point; channels are live, owned
//! network handles bound to one ref plus resolved credentials. The factory
//! trait keeps the transport swappable: the production implementation speaks
//! the Pub/Sub v1 HTTP/JSON protocol, tests plug in an in-memory hub.

pub mod http;
pub mod wire;

use crate::auth::Credential;
use crate::error::{Error, Result, ValidationError};
use crate::pubsub::delivery::Delivery;
use crate::types::MessageAttributes;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Logical identity of a publish destination. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRef {
    project: String,
    topic: String,
}

impl TopicRef {
    /// Create a topic reference, validating both components.
    pub fn new(project: impl Into<String>, topic: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let topic = topic.into();
        validate_project_id(&project)?;
        validate_resource_id(&topic)
            .map_err(|reason| Error::Validation(ValidationError::InvalidTopicId(reason)))?;
        Ok(Self { project, topic })
    }

    /// The project (namespace) identifier.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Full resource path: `projects/{project}/topics/{topic}`.
    pub fn path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project, self.topic)
    }
}

/// Logical identity of a consumption point. Bound to exactly one topic by
/// the broker; that binding is trusted, not enforced locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRef {
    project: String,
    subscription: String,
}

impl SubscriptionRef {
    /// Create a subscription reference, validating both components.
    pub fn new(project: impl Into<String>, subscription: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let subscription = subscription.into();
        validate_project_id(&project)?;
        validate_resource_id(&subscription)
            .map_err(|reason| Error::Validation(ValidationError::InvalidSubscriptionId(reason)))?;
        Ok(Self {
            project,
            subscription,
        })
    }

    /// The project (namespace) identifier.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The subscription name.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Full resource path: `projects/{project}/subscriptions/{subscription}`.
    pub fn path(&self) -> String {
        format!(
            "projects/{}/subscriptions/{}",
            self.project, self.subscription
        )
    }
}

impl fmt::Display for SubscriptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/subscriptions/{}",
            self.project, self.subscription
        )
    }
}

/// Handler invoked once per delivered message.
///
/// Deliveries arrive concurrently and possibly out of order; implementations
/// must be reentrant and tolerate duplicate message IDs.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivery. The handler owns the ack handshake: exactly one
    /// of `delivery.ack()` / `delivery.nack()` before the broker's deadline.
    async fn handle(&self, delivery: Delivery);
}

/// Listener invoked on an unrecoverable channel failure.
///
/// Runs on whatever task the transport fails on; implementations must be
/// non-blocking and safe to call from arbitrary concurrent contexts.
pub type FailureListener = Arc<dyn Fn(Error) + Send + Sync>;

/// Outbound channel bound to one topic.
///
/// Exclusively owned by the publisher that opened it; released exactly once.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    /// Submit one message and wait for the broker-assigned message ID.
    /// One in-flight request per call; no client-side batching.
    async fn submit(&mut self, data: Vec<u8>, attributes: MessageAttributes) -> Result<String>;

    /// Release the channel. Safe on error paths; never called twice by the
    /// owning component.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound channel bound to one subscription.
#[async_trait]
pub trait SubscribeChannel: Send + Sync {
    /// Begin receiving. Resolves once the receive loop is actively pulling,
    /// not when the subscription ends.
    async fn start(&mut self) -> Result<()>;

    /// Graceful shutdown: stop accepting new deliveries, wait up to `grace`
    /// for in-flight handler invocations, then release the channel.
    /// Already-sent acks are never dropped; unacked deliveries are abandoned
    /// to broker redelivery.
    async fn stop(&mut self, grace: Duration) -> Result<()>;
}

/// Factory for independently owned channels.
///
/// May be called any number of times with different refs; each call
/// establishes its own network session.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Open an outbound channel bound to `topic`.
    async fn open_publish_channel(
        &self,
        topic: &TopicRef,
        credential: &Credential,
    ) -> Result<Box<dyn PublishChannel>>;

    /// Open an inbound channel bound to `subscription`. The channel does not
    /// receive until [`SubscribeChannel::start`] is called.
    async fn open_subscribe_channel(
        &self,
        subscription: &SubscriptionRef,
        credential: &Credential,
        handler: Arc<dyn MessageHandler>,
        on_failure: FailureListener,
    ) -> Result<Box<dyn SubscribeChannel>>;
}

/// Validates a topic or subscription ID.
///
/// IDs must be 3-255 characters, start with a letter, and contain only
/// letters, numbers, hyphens, underscores, periods, tildes, plus, and
/// percent.
fn validate_resource_id(id: &str) -> std::result::Result<(), String> {
    if id.len() < 3 || id.len() > 255 {
        return Err(format!("{:?} must be 3-255 characters", id));
    }

    let first_char = id
        .chars()
        .next()
        .expect("id is guaranteed to be non-empty by length check above");
    if !first_char.is_ascii_alphabetic() {
        return Err(format!("{:?} must start with a letter", id));
    }

    for ch in id.chars() {
        if !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' | '+' | '%') {
            return Err(format!("{:?} contains invalid character: {}", id, ch));
        }
    }

    Ok(())
}

/// Validates a project ID.
///
/// Project IDs must be 6-30 characters, start with a lowercase letter, and
/// contain only lowercase letters, numbers, and hyphens.
fn validate_project_id(project_id: &str) -> Result<()> {
    let invalid = |reason: String| {
        Error::Validation(ValidationError::InvalidProjectId(format!(
            "{:?}: {}",
            project_id, reason
        )))
    };

    if project_id.len() < 6 || project_id.len() > 30 {
        return Err(invalid("must be 6-30 characters".into()));
    }

    let first_char = project_id
        .chars()
        .next()
        .expect("project_id is guaranteed to be non-empty by length check above");
    if !first_char.is_ascii_lowercase() {
        return Err(invalid("must start with a lowercase letter".into()));
    }

    for ch in project_id.chars() {
        if !matches!(ch, 'a'..='z' | '0'..='9' | '-') {
            return Err(invalid(format!("contains invalid character: {}", ch)));
        }
    }

    Ok(())
}
