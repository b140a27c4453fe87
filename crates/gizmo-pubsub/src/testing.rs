//! Test doubles for code that publishes or subscribes.
//!
//! ```
//! use gizmo_core::RequestContext;
//! use gizmo_pubsub::testing::TestPublisher;
//! use gizmo_pubsub::PublisherExt;
//!
//! # tokio_test::block_on(async {
//! let publisher = TestPublisher::new();
//! publisher.publish(&RequestContext::background(), "k", &42).await.unwrap();
//! assert_eq!(publisher.published()[0].body.as_ref(), b"42");
//! # });
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use gizmo_core::RequestContext;

use crate::error::{PubSubError, PubSubResult};
use crate::publisher::{check_lengths, MessageAttributes, MultiPublisher, Publisher};
use crate::subscriber::{MessageStream, Subscriber, SubscriberMessage};

/// A message captured by [`TestPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Key passed to publish.
    pub key: String,
    /// Payload.
    pub body: Bytes,
    /// Attributes from the publishing context.
    pub attributes: MessageAttributes,
}

/// Publisher that records messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct TestPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    error: Arc<Mutex<Option<PubSubError>>>,
}

impl TestPublisher {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail with `err` until [`clear_error`](Self::clear_error).
    pub fn fail_with(&self, err: PubSubError) {
        *self.error.lock() = Some(err);
    }

    /// Lets publishes succeed again.
    pub fn clear_error(&self) {
        *self.error.lock() = None;
    }

    /// Messages published so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Forgets recorded messages.
    pub fn reset(&self) {
        self.published.lock().clear();
    }

    fn check(&self) -> PubSubResult<()> {
        match self.error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Publisher for TestPublisher {
    async fn publish_raw(&self, ctx: &RequestContext, key: &str, body: Bytes) -> PubSubResult<()> {
        self.check()?;
        self.published.lock().push(PublishedMessage {
            key: key.to_string(),
            body,
            attributes: MessageAttributes::from_context(ctx),
        });
        Ok(())
    }
}

#[async_trait]
impl MultiPublisher for TestPublisher {
    async fn publish_multi_raw(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        bodies: Vec<Bytes>,
    ) -> PubSubResult<()> {
        check_lengths(keys.len(), bodies.len())?;
        self.check()?;
        let attributes = MessageAttributes::from_context(ctx);
        self.published
            .lock()
            .extend(keys.iter().zip(bodies).map(|(key, body)| PublishedMessage {
                key: key.clone(),
                body,
                attributes: attributes.clone(),
            }));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SubscriberState {
    pending: Vec<Bytes>,
    sender: Option<mpsc::UnboundedSender<Box<dyn SubscriberMessage>>>,
    started: bool,
    stopped: bool,
    terminal: Option<PubSubError>,
    error: Option<PubSubError>,
}

#[derive(Debug, Default)]
struct Acks {
    ids: Mutex<Vec<String>>,
    error: Mutex<Option<PubSubError>>,
}

/// Subscriber that emits scripted messages and records acks.
///
/// Message `n` (zero based) has ack id `"n"`. The stream stays open until
/// [`stop`](Subscriber::stop) unless a terminal error was scripted with
/// [`fail_after_messages`](Self::fail_after_messages).
#[derive(Debug, Default)]
pub struct TestSubscriber {
    state: Mutex<SubscriberState>,
    acks: Arc<Acks>,
    next_id: AtomicUsize,
}

impl TestSubscriber {
    /// Creates a subscriber that will emit `messages` in order.
    pub fn new<I, B>(messages: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let subscriber = Self::default();
        subscriber.state.lock().pending = messages.into_iter().map(Into::into).collect();
        subscriber
    }

    /// Ends the stream with `err` once the scripted messages are emitted.
    #[must_use]
    pub fn fail_after_messages(self, err: PubSubError) -> Self {
        self.state.lock().terminal = Some(err);
        self
    }

    /// Makes `done` fail with `err` until cleared with `None`.
    pub fn set_ack_error(&self, err: Option<PubSubError>) {
        *self.acks.error.lock() = err;
    }

    /// Emits another message, on the live stream if started.
    pub fn send(&self, body: impl Into<Bytes>) {
        let body = body.into();
        let mut state = self.state.lock();
        if let Some(sender) = state.sender.clone() {
            let _ = sender.send(self.message(body));
        } else {
            state.pending.push(body);
        }
    }

    /// Ack ids recorded so far, in order.
    pub fn acked(&self) -> Vec<String> {
        self.acks.ids.lock().clone()
    }

    fn message(&self, body: Bytes) -> Box<dyn SubscriberMessage> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Box::new(TestMessage {
            ack_id: id.to_string(),
            body,
            attributes: MessageAttributes::new(),
            acked: AtomicBool::new(false),
            acks: Arc::clone(&self.acks),
        })
    }
}

#[async_trait]
impl Subscriber for TestSubscriber {
    fn start(&self) -> PubSubResult<MessageStream> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PubSubError::AlreadyStopped);
        }
        if state.started {
            return Err(PubSubError::AlreadyStarted);
        }
        state.started = true;

        let pending = std::mem::take(&mut state.pending);
        let (tx, rx) = mpsc::channel(pending.len().max(1));
        for body in pending {
            // Capacity covers every scripted message.
            let _ = tx.try_send(self.message(body));
        }

        // Forward later sends from an unbounded side channel.
        let (live_tx, mut live_rx) = mpsc::unbounded_channel::<Box<dyn SubscriberMessage>>();
        if let Some(err) = state.terminal.take() {
            state.error = Some(err);
            state.stopped = true;
        } else {
            state.sender = Some(live_tx);
            tokio::spawn(async move {
                while let Some(message) = live_rx.recv().await {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
        Ok(rx)
    }

    async fn stop(&self) -> PubSubResult<()> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PubSubError::AlreadyStopped);
        }
        state.stopped = true;
        state.sender = None;
        Ok(())
    }

    fn err(&self) -> Option<PubSubError> {
        self.state.lock().error.clone()
    }
}

struct TestMessage {
    ack_id: String,
    body: Bytes,
    attributes: MessageAttributes,
    acked: AtomicBool,
    acks: Arc<Acks>,
}

#[async_trait]
impl SubscriberMessage for TestMessage {
    fn body(&self) -> &Bytes {
        &self.body
    }

    fn attributes(&self) -> &MessageAttributes {
        &self.attributes
    }

    async fn done(&self) -> PubSubResult<()> {
        if self.acked.swap(true, Ordering::SeqCst) {
            return Err(PubSubError::AlreadyAcknowledged);
        }
        if let Some(err) = self.acks.error.lock().clone() {
            return Err(err);
        }
        self.acks.ids.lock().push(self.ack_id.clone());
        Ok(())
    }

    async fn extend_deadline(&self, _by: Duration) -> PubSubResult<()> {
        Err(PubSubError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publisher_records_and_fails() {
        let publisher = TestPublisher::new();
        let ctx = RequestContext::background();
        publisher.publish_raw(&ctx, "a", Bytes::from_static(b"1")).await.unwrap();

        publisher.fail_with(PubSubError::broker("down"));
        assert!(publisher.publish_raw(&ctx, "b", Bytes::new()).await.is_err());
        publisher.clear_error();

        publisher
            .publish_multi_raw(&ctx, &["c".into(), "d".into()], vec![Bytes::new(), Bytes::new()])
            .await
            .unwrap();
        let keys: Vec<_> = publisher.published().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_subscriber_script() {
        let subscriber = TestSubscriber::new(["m1", "m2"]);
        let mut stream = subscriber.start().unwrap();

        let first = stream.recv().await.unwrap();
        assert_eq!(first.body(), &Bytes::from_static(b"m1"));
        first.done().await.unwrap();
        assert_eq!(first.done().await, Err(PubSubError::AlreadyAcknowledged));
        assert!(first
            .extend_deadline(Duration::from_secs(1))
            .await
            .unwrap_err()
            .is_not_supported());

        subscriber.send("m3");
        let second = stream.recv().await.unwrap();
        let third = stream.recv().await.unwrap();
        assert_eq!(third.body(), &Bytes::from_static(b"m3"));
        second.done().await.unwrap();

        subscriber.stop().await.unwrap();
        assert!(stream.recv().await.is_none());
        assert_eq!(subscriber.acked(), vec!["0", "1"]);
        assert_eq!(subscriber.stop().await, Err(PubSubError::AlreadyStopped));
    }

    #[tokio::test]
    async fn test_subscriber_terminal_error() {
        let subscriber =
            TestSubscriber::new(["m1"]).fail_after_messages(PubSubError::broker("gone"));
        let mut stream = subscriber.start().unwrap();

        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
        assert_eq!(subscriber.err(), Some(PubSubError::broker("gone")));
    }

    #[tokio::test]
    async fn test_ack_error_injection() {
        let subscriber = TestSubscriber::new(["m1"]);
        subscriber.set_ack_error(Some(PubSubError::broker("nack")));
        let mut stream = subscriber.start().unwrap();
        let message = stream.recv().await.unwrap();
        assert_eq!(message.done().await, Err(PubSubError::broker("nack")));
        assert!(subscriber.acked().is_empty());
        subscriber.stop().await.unwrap();
    }
}
