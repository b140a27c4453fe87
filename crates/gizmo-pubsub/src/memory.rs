//! In-process broker with leases and redelivery.
//!
//! [`MemoryQueue`] is both a publisher and a [`QueueClient`], so a
//! [`QueueSubscriber`](crate::QueueSubscriber) can consume what the same
//! queue publishes. A received message is leased for the visibility timeout
//! and goes back to the front of the queue if it is not acknowledged in
//! time. Published payloads are base64 encoded by default to match the
//! subscriber's default of decoding them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use gizmo_core::RequestContext;

use crate::error::{PubSubError, PubSubResult};
use crate::publisher::{check_lengths, MessageAttributes, MultiPublisher, Publisher};
use crate::queue::{QueueClient, ReceivedMessage};

/// Default lease length.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Stored {
    id: u64,
    body: Bytes,
    attributes: MessageAttributes,
    deliveries: u32,
}

#[derive(Debug)]
struct Lease {
    message: Stored,
    expires: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Stored>,
    leased: HashMap<String, Lease>,
    acked: Vec<String>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    arrived: Notify,
    visibility_timeout: Duration,
    encode_base64: bool,
}

/// In-memory queue. Clones share the same messages.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::with_options(DEFAULT_VISIBILITY_TIMEOUT, true)
    }
}

impl MemoryQueue {
    /// Creates an empty queue with a 30s lease that base64 encodes published payloads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue.
    pub fn with_options(visibility_timeout: Duration, encode_base64: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                arrived: Notify::new(),
                visibility_timeout,
                encode_base64,
            }),
        }
    }

    /// Enqueues a payload exactly as given.
    pub fn push(&self, body: impl Into<Bytes>, attributes: MessageAttributes) {
        self.push_all(std::iter::once((body.into(), attributes)));
    }

    fn push_all(&self, messages: impl IntoIterator<Item = (Bytes, MessageAttributes)>) {
        {
            let mut state = self.inner.state.lock();
            for (body, attributes) in messages {
                state.next_id += 1;
                let id = state.next_id;
                state.ready.push_back(Stored {
                    id,
                    body,
                    attributes,
                    deliveries: 0,
                });
            }
        }
        self.inner.arrived.notify_waiters();
    }

    fn encode(&self, body: Bytes) -> Bytes {
        if self.inner.encode_base64 {
            Bytes::from(base64::engine::general_purpose::STANDARD.encode(&body))
        } else {
            body
        }
    }

    /// Ack ids acknowledged so far, in order.
    pub fn acked_ids(&self) -> Vec<String> {
        self.inner.state.lock().acked.clone()
    }

    /// Number of acknowledged deliveries.
    pub fn ack_count(&self) -> usize {
        self.inner.state.lock().acked.len()
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    /// Messages received and not yet acknowledged.
    pub fn leased_len(&self) -> usize {
        self.inner.state.lock().leased.len()
    }

    fn take(&self, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let mut expired: Vec<String> = state
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        expired.sort();
        for ack_id in expired.into_iter().rev() {
            if let Some(lease) = state.leased.remove(&ack_id) {
                tracing::debug!(ack_id = %ack_id, "lease expired, redelivering");
                state.ready.push_front(lease.message);
            }
        }

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.deliveries += 1;
            let ack_id = format!("{}-{}", message.id, message.deliveries);
            batch.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                body: message.body.clone(),
                attributes: message.attributes.clone(),
            });
            state.leased.insert(
                ack_id,
                Lease {
                    message,
                    expires: now + self.inner.visibility_timeout,
                },
            );
        }
        batch
    }
}

#[async_trait]
impl Publisher for MemoryQueue {
    async fn publish_raw(&self, ctx: &RequestContext, key: &str, body: Bytes) -> PubSubResult<()> {
        tracing::trace!(key, len = body.len(), "memory queue publish");
        self.push(self.encode(body), MessageAttributes::from_context(ctx));
        Ok(())
    }
}

#[async_trait]
impl MultiPublisher for MemoryQueue {
    async fn publish_multi_raw(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        bodies: Vec<Bytes>,
    ) -> PubSubResult<()> {
        check_lengths(keys.len(), bodies.len())?;
        let attributes = MessageAttributes::from_context(ctx);
        self.push_all(
            bodies
                .into_iter()
                .map(|body| (self.encode(body), attributes.clone())),
        );
        Ok(())
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> PubSubResult<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let arrived = self.inner.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let batch = self.take(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(self.take(max_messages));
            }
        }
    }

    async fn ack(&self, ack_ids: &[String]) -> PubSubResult<()> {
        let mut state = self.inner.state.lock();
        for ack_id in ack_ids {
            if state.leased.remove(ack_id).is_some() {
                state.acked.push(ack_id.clone());
            } else {
                tracing::debug!(ack_id = %ack_id, "ack for unknown or expired lease");
            }
        }
        Ok(())
    }

    async fn extend(&self, ack_id: &str, by: Duration) -> PubSubResult<()> {
        let mut state = self.inner.state.lock();
        let lease = state
            .leased
            .get_mut(ack_id)
            .ok_or_else(|| PubSubError::broker(format!("no active lease for {ack_id}")))?;
        lease.expires = Instant::now() + by;
        Ok(())
    }
}
