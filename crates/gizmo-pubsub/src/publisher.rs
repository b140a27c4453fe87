//! Publisher contracts.
//!
//! [`Publisher::publish_raw`] hands bytes to a destination. The typed
//! [`PublisherExt::publish`] serializes to JSON first and is available on
//! every publisher. Keys are routing hints that a transport may ignore.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use gizmo_core::RequestContext;

use crate::error::{PubSubError, PubSubResult};

/// Per-message attributes carried through the request context.
///
/// Publishers that support attributes read them with
/// [`MessageAttributes::from_context`] and attach them to every message
/// published with that context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageAttributes(BTreeMap<String, String>);

impl MessageAttributes {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets an attribute in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up an attribute.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Attributes stored on the context, or an empty set.
    pub fn from_context(ctx: &RequestContext) -> Self {
        ctx.get::<Self>().cloned().unwrap_or_default()
    }

    /// Stores these attributes on the context, replacing any previous set.
    pub fn attach(self, ctx: &mut RequestContext) {
        ctx.insert(self);
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MessageAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Delivers messages to one destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes already-encoded bytes.
    async fn publish_raw(&self, ctx: &RequestContext, key: &str, body: Bytes) -> PubSubResult<()>;
}

/// A publisher that can send several messages in one call.
///
/// Delivery is at-least-once. A failure part-way through says nothing about
/// which messages were delivered.
#[async_trait]
pub trait MultiPublisher: Publisher {
    /// Publishes already-encoded bytes, one key per body.
    async fn publish_multi_raw(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        bodies: Vec<Bytes>,
    ) -> PubSubResult<()>;
}

/// JSON helpers available on every [`Publisher`].
#[async_trait]
pub trait PublisherExt: Publisher {
    /// Serializes `message` to JSON and publishes it.
    async fn publish<M>(&self, ctx: &RequestContext, key: &str, message: &M) -> PubSubResult<()>
    where
        M: Serialize + Sync + ?Sized,
    {
        let body = serde_json::to_vec(message)?;
        self.publish_raw(ctx, key, Bytes::from(body)).await
    }
}

impl<P: Publisher + ?Sized> PublisherExt for P {}

/// JSON helpers available on every [`MultiPublisher`].
#[async_trait]
pub trait MultiPublisherExt: MultiPublisher {
    /// Serializes each message to JSON and publishes them together.
    ///
    /// Fails with [`PubSubError::LengthMismatch`] before publishing anything
    /// when the slices differ in length.
    async fn publish_multi<M>(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        messages: &[M],
    ) -> PubSubResult<()>
    where
        M: Serialize + Sync,
    {
        check_lengths(keys.len(), messages.len())?;
        let bodies = messages
            .iter()
            .map(|m| serde_json::to_vec(m).map(Bytes::from))
            .collect::<Result<Vec<_>, _>>()?;
        self.publish_multi_raw(ctx, keys, bodies).await
    }
}

impl<P: MultiPublisher + ?Sized> MultiPublisherExt for P {}

/// Rejects key and message slices of different length.
pub fn check_lengths(keys: usize, messages: usize) -> PubSubResult<()> {
    if keys == messages {
        Ok(())
    } else {
        Err(PubSubError::LengthMismatch { keys, messages })
    }
}
