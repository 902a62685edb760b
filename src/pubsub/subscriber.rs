//! Managed subscriber with an explicit lifecycle state machine.

use crate::auth::CredentialProvider;
use crate::channel::{ChannelFactory, FailureListener, MessageHandler, SubscribeChannel, SubscriptionRef};
use crate::error::{Error, Result};
use crate::pubsub::delivery::Delivery;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Subscriber lifecycle states.
///
/// Legal transitions: `Stopped -> Starting -> Running -> Stopping -> Stopped`,
/// plus `Starting | Running -> Failed` on an unrecoverable channel error and
/// `Failed -> Stopping -> Stopped` for cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Not consuming; the initial and terminal resting state.
    Stopped,
    /// `start()` is opening and confirming the channel.
    Starting,
    /// The receive loop is live and deliveries flow to the handler.
    Running,
    /// `stop()` is draining in-flight handlers.
    Stopping,
    /// The channel failed unrecoverably; only `stop()` leaves this state.
    Failed,
}

impl SubscriberState {
    fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Stopped => "stopped",
            SubscriberState::Starting => "starting",
            SubscriberState::Running => "running",
            SubscriberState::Stopping => "stopping",
            SubscriberState::Failed => "failed",
        }
    }
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumes one subscription, dispatching each delivery to a handler.
///
/// `start()` returns once the channel confirms it is actively receiving, not
/// when the subscription ends; deliveries then run on the runtime's worker
/// tasks. Runtime channel failures never propagate to callers (there is no
/// caller once running) - they transition the state machine to
/// [`SubscriberState::Failed`] and are logged and counted.
pub struct Subscriber {
    factory: Arc<dyn ChannelFactory>,
    credentials: Arc<CredentialProvider>,
    subscription: SubscriptionRef,
    handler: Arc<dyn MessageHandler>,
    grace_period: Duration,
    state: Arc<Mutex<SubscriberState>>,
    channel: tokio::sync::Mutex<Option<Box<dyn SubscribeChannel>>>,
}

impl Subscriber {
    /// Create a subscriber bound to `subscription`.
    pub fn new(
        factory: Arc<dyn ChannelFactory>,
        credentials: Arc<CredentialProvider>,
        subscription: SubscriptionRef,
        handler: Arc<dyn MessageHandler>,
        grace_period: Duration,
    ) -> Self {
        Self {
            factory,
            credentials,
            subscription,
            handler,
            grace_period,
            state: Arc::new(Mutex::new(SubscriberState::Stopped)),
            channel: tokio::sync::Mutex::new(None),
        }
    }

    /// The subscription this subscriber consumes.
    pub fn subscription(&self) -> &SubscriptionRef {
        &self.subscription
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        *self.state.lock().expect("subscriber state lock poisoned")
    }

    /// Begin consuming. Valid only from [`SubscriberState::Stopped`].
    ///
    /// Fails with [`Error::SubscriberStart`] (state unchanged) when called
    /// from any other state or when the channel cannot be opened; credential
    /// resolution failure surfaces as [`Error::Auth`].
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("subscriber state lock poisoned");
            match *state {
                SubscriberState::Stopped => *state = SubscriberState::Starting,
                current => {
                    return Err(Error::SubscriberStart(format!(
                        "cannot start while {}",
                        current
                    )));
                }
            }
        }

        match self.try_start().await {
            Ok(()) => {
                // The failure listener may have fired between the channel
                // confirming and this point; do not clobber Failed.
                let mut state = self.state.lock().expect("subscriber state lock poisoned");
                if *state == SubscriberState::Starting {
                    *state = SubscriberState::Running;
                    info!(subscription = %self.subscription, "subscriber running");
                }
                Ok(())
            }
            Err(e) => {
                *self.state.lock().expect("subscriber state lock poisoned") =
                    SubscriberState::Stopped;
                Err(e)
            }
        }
    }

    async fn try_start(&self) -> Result<()> {
        let credential = self.credentials.resolve()?;

        let mut channel = self
            .factory
            .open_subscribe_channel(
                &self.subscription,
                &credential,
                self.handler.clone(),
                self.failure_listener(),
            )
            .await
            .map_err(|e| match e {
                Error::Auth(_) => e,
                other => Error::SubscriberStart(format!("cannot open channel: {}", other)),
            })?;

        channel
            .start()
            .await
            .map_err(|e| Error::SubscriberStart(format!("cannot begin receiving: {}", e)))?;

        *self.channel.lock().await = Some(channel);
        Ok(())
    }

    /// Gracefully stop consuming.
    ///
    /// Valid from [`SubscriberState::Running`] or [`SubscriberState::Failed`];
    /// a no-op from [`SubscriberState::Stopped`]. Waits up to the configured
    /// grace period for in-flight handler invocations; deliveries that do not
    /// reach a terminal ack/nack in time are abandoned to broker redelivery.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().expect("subscriber state lock poisoned");
            match *state {
                SubscriberState::Stopped => return Ok(()),
                SubscriberState::Running | SubscriberState::Failed => {
                    *state = SubscriberState::Stopping;
                }
                SubscriberState::Starting => {
                    return Err(Error::InvalidTransition {
                        from: "starting",
                        action: "stop",
                    });
                }
                SubscriberState::Stopping => return Ok(()),
            }
        }

        let channel = self.channel.lock().await.take();
        if let Some(mut channel) = channel {
            if let Err(e) = channel.stop(self.grace_period).await {
                warn!(subscription = %self.subscription, error = %e, "error while releasing subscribe channel");
            }
        }

        *self.state.lock().expect("subscriber state lock poisoned") = SubscriberState::Stopped;
        info!(subscription = %self.subscription, "subscriber stopped");
        Ok(())
    }

    /// Build the listener the transport invokes on unrecoverable failure.
    /// It runs on whatever task the transport fails on, so it only takes the
    /// short state lock, logs, and counts - nothing blocking.
    fn failure_listener(&self) -> FailureListener {
        let state = self.state.clone();
        let subscription = self.subscription.clone();
        Arc::new(move |failure: Error| {
            error!(subscription = %subscription, error = %failure, "subscriber channel failed");
            let mut state = state.lock().expect("subscriber state lock poisoned");
            if matches!(
                *state,
                SubscriberState::Starting | SubscriberState::Running
            ) {
                *state = SubscriberState::Failed;
            }
        })
    }
}

/// Reference handler: log the message and acknowledge unconditionally.
///
/// A stub policy. Production handlers should branch on processing success
/// and nack on transient failure so the broker redelivers.
pub struct LoggingHandler;

impl LoggingHandler {
    /// Create the handler.
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, delivery: Delivery) {
        info!(
            message_id = %delivery.message.id,
            attempt = delivery.message.delivery_attempt.unwrap_or(1),
            data = %delivery.message.data_as_text(),
            "received message"
        );

        if let Err(e) = delivery.ack().await {
            // An ack failure means redelivery; the broker owns that retry.
            warn!(message_id = %delivery.message.id, error = %e, "acknowledgment failed");
        } else {
            info!(message_id = %delivery.message.id, "message acknowledged");
        }
    }
}
