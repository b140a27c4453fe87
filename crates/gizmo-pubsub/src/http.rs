//! JSON-over-HTTP publisher.
//!
//! Each publish is one `POST` of a [`PublishBatch`] to the configured URL.
//! Bodies travel base64 encoded so arbitrary bytes survive the JSON
//! envelope. Attributes on the request context ride along with every record.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use gizmo_core::RequestContext;

use crate::error::{PubSubError, PubSubResult};
use crate::publisher::{check_lengths, MessageAttributes, MultiPublisher, Publisher};

/// Request header carrying the publishing request's id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest error body kept in [`PubSubError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// One published message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    /// Routing key.
    pub key: String,
    /// Base64 payload.
    pub body: String,
    /// Message attributes.
    #[serde(default, skip_serializing_if = "MessageAttributes::is_empty")]
    pub attributes: MessageAttributes,
}

impl PublishRecord {
    /// Encodes a payload into a record.
    pub fn new(key: impl Into<String>, body: &[u8], attributes: MessageAttributes) -> Self {
        Self {
            key: key.into(),
            body: base64::engine::general_purpose::STANDARD.encode(body),
            attributes,
        }
    }

    /// Decodes the payload.
    pub fn decode_body(&self) -> PubSubResult<Bytes> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.body)
            .map(Bytes::from)
            .map_err(|e| PubSubError::Decode(e.to_string()))
    }
}

/// Request body of one publish call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishBatch {
    /// Records in publish order.
    pub records: Vec<PublishRecord>,
}

/// Publisher posting JSON records to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    url: String,
}

impl HttpPublisher {
    /// Creates a publisher with a 10s request timeout.
    pub fn new(url: impl Into<String>) -> PubSubResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PubSubError::Transport(format!("failed to create client: {e}")))?;
        Ok(Self::with_client(client, url))
    }

    /// Creates a publisher over an existing client.
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, ctx: &RequestContext, records: Vec<PublishRecord>) -> PubSubResult<()> {
        let count = records.len();
        let response = self
            .client
            .post(&self.url)
            .header(REQUEST_ID_HEADER, ctx.request_id().to_string())
            .json(&PublishBatch { records })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.url, count, "published");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        tracing::warn!(url = %self.url, status = status.as_u16(), "publish rejected");
        Err(PubSubError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish_raw(&self, ctx: &RequestContext, key: &str, body: Bytes) -> PubSubResult<()> {
        let record = PublishRecord::new(key, &body, MessageAttributes::from_context(ctx));
        self.send(ctx, vec![record]).await
    }
}

#[async_trait]
impl MultiPublisher for HttpPublisher {
    async fn publish_multi_raw(
        &self,
        ctx: &RequestContext,
        keys: &[String],
        bodies: Vec<Bytes>,
    ) -> PubSubResult<()> {
        check_lengths(keys.len(), bodies.len())?;
        let attributes = MessageAttributes::from_context(ctx);
        let records = keys
            .iter()
            .zip(&bodies)
            .map(|(key, body)| PublishRecord::new(key.as_str(), body, attributes.clone()))
            .collect();
        self.send(ctx, records).await
    }
}
