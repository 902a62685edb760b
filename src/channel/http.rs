//! HTTP transport speaking the Pub/Sub v1 JSON protocol.
//!
//! Publish channels issue one `:publish` RPC per submission and wait for the
//! broker-assigned message ID. Subscribe channels run a pull loop on a tokio
//! task, dispatch each received message to the handler concurrently, and
//! resolve acknowledgments through `:acknowledge` / `:modifyAckDeadline 0`.

use crate::auth::Credential;
use crate::channel::wire::{
    AcknowledgeRequest, ErrorResponse, ModifyAckDeadlineRequest, PublishRequest, PublishResponse,
    PubsubMessage, PullRequest, PullResponse,
};
use crate::channel::{
    ChannelFactory, FailureListener, MessageHandler, PublishChannel, SubscribeChannel,
    SubscriptionRef, TopicRef,
};
use crate::error::{AckError, Error, Result};
use crate::metrics::METRICS;
use crate::pubsub::delivery::{AckHandle, AckSink, Delivery};
use crate::types::{Message, MessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Wait between empty pulls before asking the broker again.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-pull request timeout.
const PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap for the transient-failure backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for HTTP channels.
#[derive(Debug, Clone)]
pub struct HttpChannelConfig {
    /// Base URL of the broker (e.g. `http://127.0.0.1:8086`).
    pub endpoint: String,
    /// Per-request timeout for publish and acknowledgment RPCs.
    /// `None` leaves the wait unbounded.
    pub request_timeout: Option<Duration>,
    /// Maximum messages requested per pull.
    pub pull_batch_size: u32,
    /// Consecutive transient pull failures tolerated before the channel is
    /// declared failed.
    pub max_consecutive_failures: u32,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086".to_string(),
            request_timeout: None,
            pull_batch_size: 10,
            max_consecutive_failures: 5,
        }
    }
}

/// Channel factory backed by the broker's HTTP/JSON API.
pub struct HttpChannelFactory {
    client: Client,
    config: HttpChannelConfig,
}

impl HttpChannelFactory {
    /// Create a factory. Channels opened from it share one connection pool
    /// but are independently owned.
    pub fn new(config: HttpChannelConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Connect(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Establish the session: verify the resource exists and the credential
    /// is accepted. Nothing is sent or received beyond that until the
    /// channel is used.
    async fn verify_resource(&self, url: &str, credential: &Credential) -> Result<()> {
        let mut request = self.client.get(url);
        if let Some(token) = credential.token() {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connect(format!("cannot reach broker at {}: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Auth(format!(
                "broker rejected credential: {}",
                error_body(response).await
            )))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::Connect(format!("resource not found: {}", url)))
        } else {
            Err(Error::Connect(error_body(response).await))
        }
    }
}

#[async_trait]
impl ChannelFactory for HttpChannelFactory {
    async fn open_publish_channel(
        &self,
        topic: &TopicRef,
        credential: &Credential,
    ) -> Result<Box<dyn PublishChannel>> {
        let topic_path = topic.path();
        self.verify_resource(&self.resource_url(&topic_path), credential)
            .await?;

        METRICS.open_channels.with_label_values(&["publish"]).inc();
        debug!(topic = %topic_path, "opened publish channel");

        Ok(Box::new(HttpPublishChannel {
            client: self.client.clone(),
            publish_url: format!("{}:publish", self.resource_url(&topic_path)),
            topic_path,
            token: credential.token().map(str::to_owned),
            request_timeout: self.config.request_timeout,
            open: true,
        }))
    }

    async fn open_subscribe_channel(
        &self,
        subscription: &SubscriptionRef,
        credential: &Credential,
        handler: Arc<dyn MessageHandler>,
        on_failure: FailureListener,
    ) -> Result<Box<dyn SubscribeChannel>> {
        let subscription_path = subscription.path();
        let base = self.resource_url(&subscription_path);
        self.verify_resource(&base, credential).await?;

        let token = credential.token().map(str::to_owned);
        let sink = Arc::new(HttpAckSink {
            client: self.client.clone(),
            ack_url: format!("{}:acknowledge", base),
            nack_url: format!("{}:modifyAckDeadline", base),
            token: token.clone(),
            subscription_path: subscription_path.clone(),
            request_timeout: self.config.request_timeout,
        });

        METRICS
            .open_channels
            .with_label_values(&["subscribe"])
            .inc();
        debug!(subscription = %subscription_path, "opened subscribe channel");

        Ok(Box::new(HttpSubscribeChannel {
            context: Arc::new(PullContext {
                client: self.client.clone(),
                pull_url: format!("{}:pull", base),
                token,
                subscription_path,
                handler,
                on_failure,
                sink,
                shutdown: AtomicBool::new(false),
                wake: Notify::new(),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                pull_batch_size: self.config.pull_batch_size.min(i32::MAX as u32) as i32,
                max_consecutive_failures: self.config.max_consecutive_failures,
            }),
            worker: None,
            open: true,
        }))
    }
}

/// Outbound channel: one `:publish` RPC per submission.
struct HttpPublishChannel {
    client: Client,
    publish_url: String,
    topic_path: String,
    token: Option<String>,
    request_timeout: Option<Duration>,
    open: bool,
}

#[async_trait]
impl PublishChannel for HttpPublishChannel {
    async fn submit(
        &mut self,
        data: Vec<u8>,
        attributes: crate::types::MessageAttributes,
    ) -> Result<String> {
        if !self.open {
            return Err(Error::Internal("publish channel already closed".into()));
        }

        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data,
                attributes: if attributes.is_empty() {
                    None
                } else {
                    Some(attributes)
                },
                message_id: None,
                publish_time: None,
                ordering_key: None,
            }],
        };

        let mut request = self.client.post(&self.publish_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Publish(format!("publish request timed out: {}", e))
            } else {
                Error::Publish(format!("publish request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!(
                "broker rejected credential: {}",
                error_body(response).await
            )));
        }
        if !status.is_success() {
            return Err(Error::Publish(error_body(response).await));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::Publish(format!("malformed publish response: {}", e)))?;

        parsed
            .message_ids
            .into_iter()
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Publish(format!(
                    "broker acknowledged {} without a message id",
                    self.topic_path
                ))
            })
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            debug!(topic = %self.topic_path, "publish channel already released");
            return Ok(());
        }
        self.open = false;
        METRICS.open_channels.with_label_values(&["publish"]).dec();
        debug!(topic = %self.topic_path, "publish channel released");
        Ok(())
    }
}

/// Acknowledgment transport for one subscription.
struct HttpAckSink {
    client: Client,
    ack_url: String,
    nack_url: String,
    token: Option<String>,
    subscription_path: String,
    request_timeout: Option<Duration>,
}

impl HttpAckSink {
    async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<()> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Connect(format!("acknowledgment request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            // The broker rejects ack IDs it no longer tracks; the deadline
            // passed and the message is already back in flight.
            Err(Error::Ack(AckError::Expired))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Auth(format!(
                "broker rejected credential: {}",
                error_body(response).await
            )))
        } else {
            Err(Error::Connect(error_body(response).await))
        }
    }
}

#[async_trait]
impl AckSink for HttpAckSink {
    async fn ack(&self, ack_id: &str) -> Result<()> {
        let result = self
            .post(
                &self.ack_url,
                &AcknowledgeRequest {
                    ack_ids: vec![ack_id.to_string()],
                },
            )
            .await;

        let labels = [self.subscription_path.as_str()];
        match &result {
            Ok(()) => METRICS.acks_total.with_label_values(&labels).inc(),
            Err(_) => METRICS.ack_failures_total.with_label_values(&labels).inc(),
        }
        result
    }

    async fn nack(&self, ack_id: &str) -> Result<()> {
        let result = self
            .post(
                &self.nack_url,
                &ModifyAckDeadlineRequest {
                    ack_ids: vec![ack_id.to_string()],
                    ack_deadline_seconds: 0,
                },
            )
            .await;

        let labels = [self.subscription_path.as_str()];
        match &result {
            Ok(()) => METRICS.nacks_total.with_label_values(&labels).inc(),
            Err(_) => METRICS.ack_failures_total.with_label_values(&labels).inc(),
        }
        result
    }
}

/// State shared between the subscribe channel handle and its pull task.
struct PullContext {
    client: Client,
    pull_url: String,
    token: Option<String>,
    subscription_path: String,
    handler: Arc<dyn MessageHandler>,
    on_failure: FailureListener,
    sink: Arc<HttpAckSink>,
    shutdown: AtomicBool,
    wake: Notify,
    in_flight: AtomicUsize,
    drained: Notify,
    pull_batch_size: i32,
    max_consecutive_failures: u32,
}

/// Inbound channel: pull loop plus concurrent handler dispatch.
struct HttpSubscribeChannel {
    context: Arc<PullContext>,
    worker: Option<JoinHandle<()>>,
    open: bool,
}

#[async_trait]
impl SubscribeChannel for HttpSubscribeChannel {
    async fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::Internal("receive loop already started".into()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        self.worker = Some(tokio::spawn(pull_loop(self.context.clone(), ready_tx)));

        ready_rx.await.map_err(|_| {
            Error::SubscriberStart("receive loop exited before confirming startup".into())
        })
    }

    async fn stop(&mut self, grace: Duration) -> Result<()> {
        self.context.shutdown.store(true, Ordering::Release);
        self.context.wake.notify_waiters();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "receive loop task failed during shutdown");
            }
        }

        // In-flight handlers keep running on the runtime; wait out the grace
        // period so their acks are not abandoned.
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let drained = self.context.drained.notified();
            tokio::pin!(drained);

            let remaining = self.context.in_flight.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    subscription = %self.context.subscription_path,
                    abandoned = remaining,
                    "grace period elapsed; unacknowledged deliveries will be redelivered"
                );
                break;
            }

            let _ = tokio::time::timeout(deadline - now, &mut drained).await;
        }

        if self.open {
            self.open = false;
            METRICS
                .open_channels
                .with_label_values(&["subscribe"])
                .dec();
            debug!(subscription = %self.context.subscription_path, "subscribe channel released");
        }
        Ok(())
    }
}

impl Drop for HttpSubscribeChannel {
    fn drop(&mut self) {
        self.context.shutdown.store(true, Ordering::Release);
        self.context.wake.notify_waiters();
        if self.open {
            METRICS
                .open_channels
                .with_label_values(&["subscribe"])
                .dec();
        }
    }
}

enum PullFailure {
    /// The subscription is gone or the credential was revoked; no retry.
    Fatal(Error),
    /// Transient transport trouble; retried with backoff.
    Transient(Error),
}

async fn pull_loop(context: Arc<PullContext>, ready: oneshot::Sender<()>) {
    debug!(subscription = %context.subscription_path, "receive loop started");
    let _ = ready.send(());

    let mut consecutive_failures = 0u32;

    loop {
        if context.shutdown.load(Ordering::Acquire) {
            break;
        }

        match pull_once(&context).await {
            Ok(received) => {
                consecutive_failures = 0;
                if received.is_empty() {
                    idle_wait(&context, POLL_INTERVAL).await;
                    continue;
                }
                for received_message in received {
                    dispatch(&context, received_message);
                }
            }
            Err(PullFailure::Fatal(error)) => {
                report_failure(&context, error);
                return;
            }
            Err(PullFailure::Transient(error)) => {
                consecutive_failures += 1;
                warn!(
                    subscription = %context.subscription_path,
                    consecutive_failures,
                    error = %error,
                    "pull failed"
                );
                if consecutive_failures >= context.max_consecutive_failures {
                    report_failure(
                        &context,
                        Error::Connect(format!(
                            "giving up after {} consecutive pull failures: {}",
                            consecutive_failures, error
                        )),
                    );
                    return;
                }
                let backoff = Duration::from_millis(
                    250u64.saturating_mul(1 << consecutive_failures.min(6)),
                )
                .min(MAX_BACKOFF);
                idle_wait(&context, backoff).await;
            }
        }
    }

    debug!(subscription = %context.subscription_path, "receive loop stopped");
}

/// Route an unrecoverable failure to the listener. The listener contract
/// requires it to be non-blocking and callable from this task.
fn report_failure(context: &PullContext, error: Error) {
    METRICS.subscriber_failures_total.inc();
    (context.on_failure)(error);
}

async fn idle_wait(context: &PullContext, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = context.wake.notified() => {}
    }
}

async fn pull_once(
    context: &PullContext,
) -> std::result::Result<Vec<crate::channel::wire::ReceivedMessage>, PullFailure> {
    let body = PullRequest {
        max_messages: context.pull_batch_size,
        return_immediately: true,
    };

    let mut request = context
        .client
        .post(&context.pull_url)
        .json(&body)
        .timeout(PULL_TIMEOUT);
    if let Some(token) = &context.token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| {
        PullFailure::Transient(Error::Connect(format!("pull request failed: {}", e)))
    })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PullFailure::Fatal(Error::Auth(format!(
            "subscription pull rejected: {}",
            error_body(response).await
        ))));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(PullFailure::Fatal(Error::Connect(format!(
            "subscription not found: {}",
            context.subscription_path
        ))));
    }
    if !status.is_success() {
        return Err(PullFailure::Transient(Error::Connect(
            error_body(response).await,
        )));
    }

    let parsed: PullResponse = response.json().await.map_err(|e| {
        PullFailure::Transient(Error::Connect(format!("malformed pull response: {}", e)))
    })?;

    Ok(parsed.received_messages.unwrap_or_default())
}

/// Hand one received message to the handler on its own task. Deliveries run
/// concurrently; the handler must be reentrant.
fn dispatch(context: &Arc<PullContext>, received: crate::channel::wire::ReceivedMessage) {
    METRICS
        .messages_received_total
        .with_label_values(&[context.subscription_path.as_str()])
        .inc();

    let message = Message {
        id: MessageId::from_string(received.message.message_id.unwrap_or_default()),
        data: received.message.data,
        attributes: received.message.attributes.unwrap_or_default(),
        publish_time: received
            .message
            .publish_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc)),
        delivery_attempt: received.delivery_attempt.and_then(|a| u32::try_from(a).ok()),
    };

    let delivery = Delivery::new(
        message,
        AckHandle::new(received.ack_id, context.sink.clone() as Arc<dyn AckSink>),
    );

    context.in_flight.fetch_add(1, Ordering::AcqRel);
    let context = context.clone();
    tokio::spawn(async move {
        context.handler.handle(delivery).await;
        if context.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            context.drained.notify_waiters();
        }
    });
}

async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) if !text.is_empty() => serde_json::from_str::<ErrorResponse>(&text)
            .map(|envelope| format!("{} ({})", envelope.error.message, status))
            .unwrap_or(text),
        _ => status.to_string(),
    }
}
