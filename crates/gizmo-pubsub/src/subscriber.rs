//! Subscriber contracts.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::PubSubResult;
use crate::publisher::MessageAttributes;

/// A message delivered by a [`Subscriber`].
#[async_trait]
pub trait SubscriberMessage: Send + Sync {
    /// Payload.
    fn body(&self) -> &Bytes;

    /// Attributes sent with the message, empty when the transport has none.
    fn attributes(&self) -> &MessageAttributes;

    /// Acknowledges the message.
    ///
    /// Call exactly once. A second call fails with
    /// [`PubSubError::AlreadyAcknowledged`](crate::PubSubError::AlreadyAcknowledged).
    /// Acks may be batched, in which case this waits for the batch and
    /// returns that batch's outcome.
    async fn done(&self) -> PubSubResult<()>;

    /// Asks the broker to hold the message lease for `by` longer.
    ///
    /// Transports without leases return
    /// [`PubSubError::NotSupported`](crate::PubSubError::NotSupported).
    async fn extend_deadline(&self, by: Duration) -> PubSubResult<()>;
}

impl fmt::Debug for dyn SubscriberMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberMessage")
            .field("len", &self.body().len())
            .field("attributes", self.attributes())
            .finish()
    }
}

/// Single-consumer stream of delivered messages.
///
/// Yields `None` once the subscriber has stopped.
pub type MessageStream = mpsc::Receiver<Box<dyn SubscriberMessage>>;

/// Pulls messages from a broker.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Starts fetching and returns the message stream.
    ///
    /// May be called once.
    fn start(&self) -> PubSubResult<MessageStream>;

    /// Stops fetching and closes the stream.
    ///
    /// A second call fails with
    /// [`PubSubError::AlreadyStopped`](crate::PubSubError::AlreadyStopped).
    async fn stop(&self) -> PubSubResult<()>;

    /// Terminal error, meaningful once the stream has ended.
    fn err(&self) -> Option<crate::PubSubError>;
}
