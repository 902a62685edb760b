//! Publish/subscribe messaging core.
//!
//! The pieces that carry the delivery guarantees:
//! - [`publisher::Publisher`]: blocking publish with guaranteed channel release
//! - [`subscriber::Subscriber`]: lifecycle-managed consumption with graceful stop
//! - [`delivery::Delivery`]: per-message single-use ack/nack handshake

pub mod delivery;
pub mod publisher;
pub mod subscriber;

pub use delivery::{AckHandle, AckSink, Delivery};
pub use publisher::Publisher;
pub use subscriber::{LoggingHandler, Subscriber, SubscriberState};
