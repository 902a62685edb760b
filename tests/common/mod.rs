//! Shared in-memory test doubles for the channel seam.
#![allow(dead_code)]

use async_trait::async_trait;
use psgate::auth::{Credential, CredentialProvider};
use psgate::channel::{
    ChannelFactory, FailureListener, MessageHandler, PublishChannel, SubscribeChannel,
    SubscriptionRef, TopicRef,
};
use psgate::config::CredentialsConfig;
use psgate::pubsub::{AckHandle, AckSink, Delivery};
use psgate::types::{Message, MessageAttributes, MessageId};
use psgate::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A message sitting in the hub between publish and delivery.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: String,
    pub data: Vec<u8>,
    pub attributes: MessageAttributes,
    pub delivery_attempt: u32,
}

struct HubInner {
    queue: Mutex<VecDeque<QueuedMessage>>,
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    submit_attempts: AtomicUsize,
    fail_open: AtomicBool,
    fail_submit: AtomicBool,
    fail_pull: AtomicBool,
    submit_delay: Mutex<Option<Duration>>,
    acked: Mutex<Vec<String>>,
    nacked: Mutex<Vec<String>>,
}

/// In-memory topic + subscription pair behind the `ChannelFactory` seam.
///
/// Publishes enqueue; the subscribe channel drains the same queue, so a
/// publisher and subscriber built on one hub form a loopback broker.
/// Counters expose channel and acknowledgment accounting to assertions,
/// and the `fail_*` switches inject failures at each stage.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                queue: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                submit_attempts: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
                fail_submit: AtomicBool::new(false),
                fail_pull: AtomicBool::new(false),
                submit_delay: Mutex::new(None),
                acked: Mutex::new(Vec::new()),
                nacked: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn factory(&self) -> Arc<dyn ChannelFactory> {
        Arc::new(MemoryFactory {
            inner: self.inner.clone(),
        })
    }

    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn submit_attempts(&self) -> usize {
        self.inner.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.inner.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pull(&self, fail: bool) {
        self.inner.fail_pull.store(fail, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.inner.submit_delay.lock().unwrap() = Some(delay);
    }

    /// Enqueue a message as if the broker delivered it for the first time.
    pub fn inject(&self, id: &str, data: &[u8]) {
        self.inject_attempt(id, data, 1);
    }

    /// Enqueue a redelivery with an explicit attempt counter. Reusing an ID
    /// models the broker redelivering the same message.
    pub fn inject_attempt(&self, id: &str, data: &[u8], delivery_attempt: u32) {
        self.inner.queue.lock().unwrap().push_back(QueuedMessage {
            id: id.to_string(),
            data: data.to_vec(),
            attributes: MessageAttributes::new(),
            delivery_attempt,
        });
    }

    pub fn acked(&self) -> Vec<String> {
        self.inner.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.inner.nacked.lock().unwrap().clone()
    }
}

struct MemoryFactory {
    inner: Arc<HubInner>,
}

#[async_trait]
impl ChannelFactory for MemoryFactory {
    async fn open_publish_channel(
        &self,
        _topic: &TopicRef,
        _credential: &Credential,
    ) -> Result<Box<dyn PublishChannel>> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Connect("injected open failure".into()));
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryPublishChannel {
            inner: self.inner.clone(),
            open: true,
        }))
    }

    async fn open_subscribe_channel(
        &self,
        _subscription: &SubscriptionRef,
        _credential: &Credential,
        handler: Arc<dyn MessageHandler>,
        on_failure: FailureListener,
    ) -> Result<Box<dyn SubscribeChannel>> {
        if self.inner.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Connect("injected open failure".into()));
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySubscribeChannel {
            inner: self.inner.clone(),
            handler,
            on_failure,
            shutdown: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            worker: None,
            open: true,
        }))
    }
}

struct MemoryPublishChannel {
    inner: Arc<HubInner>,
    open: bool,
}

#[async_trait]
impl PublishChannel for MemoryPublishChannel {
    async fn submit(&mut self, data: Vec<u8>, attributes: MessageAttributes) -> Result<String> {
        self.inner.submit_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.inner.fail_submit.load(Ordering::SeqCst) {
            return Err(Error::Publish("injected submit failure".into()));
        }

        let id = format!("mem-{}", self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.queue.lock().unwrap().push_back(QueuedMessage {
            id: id.clone(),
            data,
            attributes,
            delivery_attempt: 1,
        });
        Ok(id)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemorySubscribeChannel {
    inner: Arc<HubInner>,
    handler: Arc<dyn MessageHandler>,
    on_failure: FailureListener,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    worker: Option<JoinHandle<()>>,
    open: bool,
}

#[async_trait]
impl SubscribeChannel for MemorySubscribeChannel {
    async fn start(&mut self) -> Result<()> {
        let inner = self.inner.clone();
        let handler = self.handler.clone();
        let on_failure = self.on_failure.clone();
        let shutdown = self.shutdown.clone();
        let in_flight = self.in_flight.clone();
        let drained = self.drained.clone();

        self.worker = Some(tokio::spawn(async move {
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if inner.fail_pull.load(Ordering::SeqCst) {
                    on_failure(Error::Connect("injected pull failure".into()));
                    break;
                }

                let next = inner.queue.lock().unwrap().pop_front();
                match next {
                    Some(queued) => {
                        let message = Message {
                            id: MessageId::from_string(queued.id.clone()),
                            data: queued.data,
                            attributes: queued.attributes,
                            publish_time: None,
                            delivery_attempt: Some(queued.delivery_attempt),
                        };
                        let sink = Arc::new(MemoryAckSink {
                            inner: inner.clone(),
                        });
                        let delivery = Delivery::new(message, AckHandle::new(queued.id, sink));

                        in_flight.fetch_add(1, Ordering::SeqCst);
                        let handler = handler.clone();
                        let in_flight = in_flight.clone();
                        let drained = drained.clone();
                        tokio::spawn(async move {
                            handler.handle(delivery).await;
                            if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                                drained.notify_waiters();
                            }
                        });
                    }
                    None => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self, grace: Duration) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);

            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                break;
            }
            let _ = tokio::time::timeout(deadline - now, &mut drained).await;
        }

        if self.open {
            self.open = false;
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryAckSink {
    inner: Arc<HubInner>,
}

#[async_trait]
impl AckSink for MemoryAckSink {
    async fn ack(&self, ack_id: &str) -> Result<()> {
        self.inner.acked.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }

    async fn nack(&self, ack_id: &str) -> Result<()> {
        self.inner.nacked.lock().unwrap().push(ack_id.to_string());
        Ok(())
    }
}

/// Handler that records deliveries and resolves them per a fixed policy.
pub struct RecordingHandler {
    pub received: Mutex<Vec<(String, Vec<u8>, Option<u32>)>>,
    pub entered: AtomicUsize,
    pub delay: Option<Duration>,
    pub resolve: ResolvePolicy,
}

/// What the recording handler does with each delivery.
pub enum ResolvePolicy {
    Ack,
    Nack,
    Leave,
}

impl RecordingHandler {
    pub fn acking() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            delay: None,
            resolve: ResolvePolicy::Ack,
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            delay: Some(delay),
            resolve: ResolvePolicy::Ack,
        })
    }

    pub fn nacking() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            delay: None,
            resolve: ResolvePolicy::Nack,
        })
    }

    pub fn received_ids(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, delivery: Delivery) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push((
            delivery.message.id.to_string(),
            delivery.message.data.clone(),
            delivery.message.delivery_attempt,
        ));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.resolve {
            ResolvePolicy::Ack => {
                let _ = delivery.ack().await;
            }
            ResolvePolicy::Nack => {
                let _ = delivery.nack().await;
            }
            ResolvePolicy::Leave => {}
        }
    }
}

/// Credential provider that resolves anonymously.
pub fn anonymous_credentials() -> Arc<CredentialProvider> {
    Arc::new(CredentialProvider::new(CredentialsConfig {
        allow_anonymous: true,
        ..CredentialsConfig::default()
    }))
}

/// Credential provider with no configured source; resolution fails.
pub fn no_credentials() -> Arc<CredentialProvider> {
    Arc::new(CredentialProvider::new(CredentialsConfig::default()))
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
