//! Per-message delivery and acknowledgment handshake.

use crate::error::{AckError, Error, Result};
use crate::types::Message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Transport-side acknowledgment operations for one subscription.
#[async_trait]
pub trait AckSink: Send + Sync {
    /// Permanently remove the message from redelivery.
    async fn ack(&self, ack_id: &str) -> Result<()>;

    /// Make the message immediately eligible for redelivery.
    async fn nack(&self, ack_id: &str) -> Result<()>;
}

/// Single-use acknowledgment handle for one delivery.
///
/// Exactly one of [`ack`](Self::ack) / [`nack`](Self::nack) may be invoked;
/// the second attempt fails with [`AckError::AlreadyResolved`]. Invoking
/// neither leaves the message to broker-driven redelivery after its deadline.
pub struct AckHandle {
    ack_id: String,
    resolved: AtomicBool,
    sink: Arc<dyn AckSink>,
}

impl AckHandle {
    /// Create a handle for `ack_id`, resolving through `sink`.
    pub fn new(ack_id: impl Into<String>, sink: Arc<dyn AckSink>) -> Self {
        Self {
            ack_id: ack_id.into(),
            resolved: AtomicBool::new(false),
            sink,
        }
    }

    /// Positively acknowledge the delivery.
    pub async fn ack(&self) -> Result<()> {
        self.resolve(true).await
    }

    /// Negatively acknowledge the delivery.
    pub async fn nack(&self) -> Result<()> {
        self.resolve(false).await
    }

    /// Whether a terminal ack/nack has been invoked.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    async fn resolve(&self, positive: bool) -> Result<()> {
        // The handle is spent on the first attempt even if the RPC fails:
        // the broker will redeliver, and a retried ack on a dead handle
        // cannot be distinguished from a double ack.
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Ack(AckError::AlreadyResolved));
        }

        let result = if positive {
            self.sink.ack(&self.ack_id).await
        } else {
            self.sink.nack(&self.ack_id).await
        };

        if let Err(e) = &result {
            warn!(
                ack_id = %self.ack_id,
                positive,
                error = %e,
                "acknowledgment RPC failed; message will be redelivered"
            );
        }
        result
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if !self.resolved.load(Ordering::Acquire) {
            warn!(
                ack_id = %self.ack_id,
                "delivery dropped without ack or nack; broker will redeliver after the deadline"
            );
        }
    }
}

/// A received message plus its acknowledgment handle.
pub struct Delivery {
    /// The received message, read-only.
    pub message: Message,
    ack: AckHandle,
}

impl Delivery {
    /// Pair a message with its acknowledgment handle.
    pub fn new(message: Message, ack: AckHandle) -> Self {
        Self { message, ack }
    }

    /// Positively acknowledge this delivery.
    pub async fn ack(&self) -> Result<()> {
        self.ack.ack().await
    }

    /// Negatively acknowledge this delivery.
    pub async fn nack(&self) -> Result<()> {
        self.ack.nack().await
    }

    /// Whether this delivery has been acked or nacked.
    pub fn is_resolved(&self) -> bool {
        self.ack.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageAttributes, MessageId};
    use std::sync::atomic::AtomicUsize;

    struct RecordingSink {
        acks: AtomicUsize,
        nacks: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                acks: AtomicUsize::new(0),
                nacks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AckSink for RecordingSink {
        async fn ack(&self, _ack_id: &str) -> Result<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn nack(&self, _ack_id: &str) -> Result<()> {
            self.nacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn delivery(sink: Arc<RecordingSink>) -> Delivery {
        let message = Message {
            id: MessageId::from_string("m-1".to_string()),
            data: b"payload".to_vec(),
            attributes: MessageAttributes::new(),
            publish_time: None,
            delivery_attempt: None,
        };
        Delivery::new(message, AckHandle::new("a-1", sink))
    }

    #[tokio::test]
    async fn test_ack_is_single_use() {
        let sink = RecordingSink::new();
        let d = delivery(sink.clone());

        d.ack().await.unwrap();
        assert!(d.is_resolved());

        let second = d.ack().await;
        assert!(matches!(second, Err(Error::Ack(AckError::AlreadyResolved))));
        let cross = d.nack().await;
        assert!(matches!(cross, Err(Error::Ack(AckError::AlreadyResolved))));

        // The sink saw exactly one terminal call.
        assert_eq!(sink.acks.load(Ordering::SeqCst), 1);
        assert_eq!(sink.nacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nack_reaches_sink() {
        let sink = RecordingSink::new();
        let d = delivery(sink.clone());

        d.nack().await.unwrap();
        assert_eq!(sink.nacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rpc_still_spends_handle() {
        struct FailingSink;

        #[async_trait]
        impl AckSink for FailingSink {
            async fn ack(&self, _ack_id: &str) -> Result<()> {
                Err(Error::Connect("broker unreachable".into()))
            }

            async fn nack(&self, _ack_id: &str) -> Result<()> {
                Err(Error::Connect("broker unreachable".into()))
            }
        }

        let handle = AckHandle::new("a-2", Arc::new(FailingSink));
        assert!(handle.ack().await.is_err());
        assert!(handle.is_resolved());
        assert!(matches!(
            handle.nack().await,
            Err(Error::Ack(AckError::AlreadyResolved))
        ));
    }

    #[tokio::test]
    async fn test_drop_without_resolve_does_not_panic() {
        let sink = RecordingSink::new();
        drop(delivery(sink.clone()));
        assert_eq!(sink.acks.load(Ordering::SeqCst), 0);
        assert_eq!(sink.nacks.load(Ordering::SeqCst), 0);
    }
}
