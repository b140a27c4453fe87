//! Queue subscriber with a batched ack pipeline.
//!
//! [`QueueSubscriber`] drives any broker that implements [`QueueClient`].
//! Two tasks run per subscriber:
//!
//! - the receive task pulls batches, sleeps `idle_sleep` when a batch comes
//!   back empty, and emits each message on the stream;
//! - the ack task collects [`SubscriberMessage::done`] calls and acknowledges
//!   them to the broker in batches of `ack_batch_size`, or every
//!   `ack_flush_interval` when a batch is only partly filled.
//!
//! A shared in-flight counter goes up when a message is emitted and down when
//! its ack reaches the ack task (or the message is dropped unacknowledged).
//! After the receive task has finished, the ack task flushes and exits as
//! soon as that counter reaches zero.
//!
//! A receive error is terminal: it is stored for [`Subscriber::err`], the
//! subscriber stops itself and the stream ends. An ack error is returned
//! from `done` for every message of the failed batch and the subscriber
//! keeps running.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PubSubError, PubSubResult};
use crate::publisher::MessageAttributes;
use crate::subscriber::{MessageStream, Subscriber, SubscriberMessage};

/// A message as returned by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker handle used to acknowledge or extend this delivery.
    pub ack_id: String,
    /// Payload as stored by the broker.
    pub body: Bytes,
    /// Message attributes.
    pub attributes: MessageAttributes,
}

/// Broker operations needed by [`QueueSubscriber`].
#[async_trait]
pub trait QueueClient: Send + Sync + 'static {
    /// Receives up to `max_messages`, waiting at most `wait` for the first.
    ///
    /// An empty batch is not an error.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> PubSubResult<Vec<ReceivedMessage>>;

    /// Acknowledges a batch of deliveries.
    async fn ack(&self, ack_ids: &[String]) -> PubSubResult<()>;

    /// Extends the lease of one delivery.
    async fn extend(&self, ack_id: &str, by: Duration) -> PubSubResult<()> {
        let _ = (ack_id, by);
        Err(PubSubError::NotSupported)
    }
}

/// Tuning for [`QueueSubscriber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSubscriberConfig {
    /// Messages requested per receive call.
    pub max_messages: usize,
    /// Longest a receive call waits for messages.
    pub receive_timeout: Duration,
    /// Pause after an empty batch.
    pub idle_sleep: Duration,
    /// Acks sent to the broker per call.
    pub ack_batch_size: usize,
    /// Flush period for partly filled ack batches.
    pub ack_flush_interval: Duration,
    /// Whether payloads arrive base64 encoded and should be decoded.
    pub consume_base64: bool,
}

impl Default for QueueSubscriberConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            receive_timeout: Duration::from_secs(20),
            idle_sleep: Duration::from_secs(1),
            ack_batch_size: 10,
            ack_flush_interval: Duration::from_secs(1),
            consume_base64: true,
        }
    }
}

impl QueueSubscriberConfig {
    /// Sets the receive batch size.
    #[must_use]
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    /// Sets the receive wait.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the pause after empty batches.
    #[must_use]
    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep = sleep;
        self
    }

    /// Sets the ack batch size.
    #[must_use]
    pub fn with_ack_batch_size(mut self, size: usize) -> Self {
        self.ack_batch_size = size;
        self
    }

    /// Sets the ack flush period.
    #[must_use]
    pub fn with_ack_flush_interval(mut self, interval: Duration) -> Self {
        self.ack_flush_interval = interval;
        self
    }

    /// Sets whether payloads are base64 decoded.
    #[must_use]
    pub fn with_consume_base64(mut self, enabled: bool) -> Self {
        self.consume_base64 = enabled;
        self
    }
}

struct AckRequest {
    ack_id: String,
    reply: oneshot::Sender<PubSubResult<()>>,
}

struct Shared<C> {
    client: Arc<C>,
    config: QueueSubscriberConfig,
    started: AtomicBool,
    stopped: AtomicBool,
    in_flight: AtomicUsize,
    released: Notify,
    stop: CancellationToken,
    receive_finished: CancellationToken,
    error: Mutex<Option<PubSubError>>,
}

impl<C> Shared<C> {
    fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        self.released.notify_one();
    }

    fn fail(&self, err: PubSubError) {
        *self.error.lock() = Some(err);
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.cancel();
    }
}

/// Subscriber over a [`QueueClient`].
///
/// ```no_run
/// use gizmo_pubsub::{MemoryQueue, QueueSubscriber, QueueSubscriberConfig, Subscriber, SubscriberMessage};
///
/// # async fn run() -> gizmo_pubsub::PubSubResult<()> {
/// let queue = MemoryQueue::new();
/// let subscriber = QueueSubscriber::new(queue, QueueSubscriberConfig::default());
///
/// let mut stream = subscriber.start()?;
/// while let Some(message) = stream.recv().await {
///     println!("{} bytes", message.body().len());
///     message.done().await?;
/// }
/// subscriber.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct QueueSubscriber<C: QueueClient> {
    shared: Arc<Shared<C>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<C: QueueClient> fmt::Debug for QueueSubscriber<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSubscriber")
            .field("config", &self.shared.config)
            .field("stopped", &self.shared.stopped.load(Ordering::SeqCst))
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl<C: QueueClient> QueueSubscriber<C> {
    /// Creates a subscriber. Nothing is fetched until [`Subscriber::start`].
    pub fn new(client: C, config: QueueSubscriberConfig) -> Self {
        Self::from_arc(Arc::new(client), config)
    }

    /// Creates a subscriber over a shared client.
    pub fn from_arc(client: Arc<C>, mut config: QueueSubscriberConfig) -> Self {
        config.max_messages = config.max_messages.max(1);
        config.ack_batch_size = config.ack_batch_size.max(1);
        config.ack_flush_interval = config.ack_flush_interval.max(Duration::from_millis(1));
        Self {
            shared: Arc::new(Shared {
                client,
                config,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                released: Notify::new(),
                stop: CancellationToken::new(),
                receive_finished: CancellationToken::new(),
                error: Mutex::new(None),
            }),
            receiver: Mutex::new(None),
        }
    }

    /// Messages emitted and not yet acknowledged or dropped.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// The broker client.
    pub fn client(&self) -> &C {
        &self.shared.client
    }
}

#[async_trait]
impl<C: QueueClient> Subscriber for QueueSubscriber<C> {
    fn start(&self) -> PubSubResult<MessageStream> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(PubSubError::AlreadyStopped);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PubSubError::Runtime(e.to_string()))?;
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(PubSubError::AlreadyStarted);
        }

        let config = &self.shared.config;
        let (message_tx, message_rx) = mpsc::channel(config.max_messages);
        let (ack_tx, ack_rx) = mpsc::channel(config.ack_batch_size * 4);

        runtime.spawn(ack_loop(Arc::clone(&self.shared), ack_rx));
        let receiver = runtime.spawn(receive_loop(Arc::clone(&self.shared), message_tx, ack_tx));
        *self.receiver.lock() = Some(receiver);

        tracing::debug!(
            max_messages = config.max_messages,
            ack_batch_size = config.ack_batch_size,
            "queue subscriber started"
        );
        Ok(message_rx)
    }

    async fn stop(&self) -> PubSubResult<()> {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return Err(PubSubError::AlreadyStopped);
        }
        self.shared.stop.cancel();

        let receiver = self.receiver.lock().take();
        if let Some(receiver) = receiver {
            if let Err(err) = receiver.await {
                tracing::error!(error = %err, "queue receive task failed");
            }
        }
        tracing::debug!(in_flight = self.in_flight(), "queue subscriber stopped");
        Ok(())
    }

    fn err(&self) -> Option<PubSubError> {
        self.shared.error.lock().clone()
    }
}

impl<C: QueueClient> Drop for QueueSubscriber<C> {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

async fn receive_loop<C: QueueClient>(
    shared: Arc<Shared<C>>,
    messages: mpsc::Sender<Box<dyn SubscriberMessage>>,
    acks: mpsc::Sender<AckRequest>,
) {
    let config = &shared.config;

    'receive: loop {
        let result = tokio::select! {
            biased;
            () = shared.stop.cancelled() => break,
            result = shared.client.receive(config.max_messages, config.receive_timeout) => result,
        };

        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "queue receive failed, stopping subscriber");
                shared.fail(err);
                break;
            }
        };

        if batch.is_empty() {
            tokio::select! {
                () = shared.stop.cancelled() => break,
                () = tokio::time::sleep(config.idle_sleep) => continue,
            }
        }

        for received in batch {
            let body = if config.consume_base64 {
                match base64::engine::general_purpose::STANDARD.decode(&received.body) {
                    Ok(decoded) => Bytes::from(decoded),
                    Err(err) => {
                        tracing::warn!(
                            ack_id = %received.ack_id,
                            error = %err,
                            "dropping message with invalid base64 payload"
                        );
                        continue;
                    }
                }
            } else {
                received.body
            };

            shared.in_flight.fetch_add(1, Ordering::SeqCst);
            let message: Box<dyn SubscriberMessage> = Box::new(QueueMessage {
                ack_id: received.ack_id,
                body,
                attributes: received.attributes,
                acked: AtomicBool::new(false),
                queued: AtomicBool::new(false),
                acks: acks.clone(),
                shared: Arc::clone(&shared),
            });

            // Dropping an unsent message releases its in-flight slot.
            tokio::select! {
                biased;
                () = shared.stop.cancelled() => break 'receive,
                sent = messages.send(message) => {
                    if sent.is_err() {
                        tracing::debug!("message stream dropped, stopping receive");
                        break 'receive;
                    }
                }
            }
        }
    }

    shared.receive_finished.cancel();
    shared.released.notify_one();
}

async fn ack_loop<C: QueueClient>(
    shared: Arc<Shared<C>>,
    mut requests: mpsc::Receiver<AckRequest>,
) {
    let batch_size = shared.config.ack_batch_size;
    let mut pending: Vec<AckRequest> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(shared.config.ack_flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => {
                    shared.release();
                    pending.push(request);
                    if pending.len() >= batch_size {
                        flush(&*shared.client, &mut pending).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => flush(&*shared.client, &mut pending).await,
            () = shared.released.notified() => {}
        }

        if shared.receive_finished.is_cancelled() && shared.in_flight.load(Ordering::SeqCst) == 0 {
            break;
        }
    }

    flush(&*shared.client, &mut pending).await;
    tracing::debug!("ack pipeline finished");
}

async fn flush<C: QueueClient>(client: &C, pending: &mut Vec<AckRequest>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    let ack_ids: Vec<String> = batch.iter().map(|r| r.ack_id.clone()).collect();

    let result = client.ack(&ack_ids).await;
    if let Err(err) = &result {
        tracing::warn!(error = %err, count = ack_ids.len(), "ack batch failed");
    }
    for request in batch {
        let _ = request.reply.send(result.clone());
    }
}

struct QueueMessage<C> {
    ack_id: String,
    body: Bytes,
    attributes: MessageAttributes,
    acked: AtomicBool,
    // Set once the ack request is in the pipeline, which then owns the
    // in-flight slot.
    queued: AtomicBool,
    acks: mpsc::Sender<AckRequest>,
    shared: Arc<Shared<C>>,
}

// Undoes an ack claim unless the request reached the pipeline.
struct AckClaim<'a> {
    acked: Option<&'a AtomicBool>,
}

impl AckClaim<'_> {
    fn commit(&mut self) {
        self.acked = None;
    }
}

impl Drop for AckClaim<'_> {
    fn drop(&mut self) {
        if let Some(acked) = self.acked {
            acked.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl<C: QueueClient> SubscriberMessage for QueueMessage<C> {
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
        let mut claim = AckClaim {
            acked: Some(&self.acked),
        };
        let (reply, outcome) = oneshot::channel();
        self.acks
            .send(AckRequest {
                ack_id: self.ack_id.clone(),
                reply,
            })
            .await
            .map_err(|_| PubSubError::AckPipelineClosed)?;
        self.queued.store(true, Ordering::SeqCst);
        claim.commit();
        outcome.await.map_err(|_| PubSubError::AckPipelineClosed)?
    }

    async fn extend_deadline(&self, by: Duration) -> PubSubResult<()> {
        if self.acked.load(Ordering::SeqCst) {
            return Err(PubSubError::AlreadyAcknowledged);
        }
        self.shared.client.extend(&self.ack_id, by).await
    }
}

impl<C> Drop for QueueMessage<C> {
    fn drop(&mut self) {
        if !self.queued.load(Ordering::SeqCst) {
            self.shared.release();
        }
    }
}
