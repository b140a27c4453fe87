//! # Gizmo PubSub
//!
//! Messaging contracts for Gizmo services:
//!
//! - [`Publisher`] / [`MultiPublisher`] - deliver raw bytes, with JSON
//!   helpers in [`PublisherExt`] and [`MultiPublisherExt`]
//! - [`Subscriber`] / [`SubscriberMessage`] - a single-consumer message
//!   stream with per-message acknowledgement
//! - [`QueueSubscriber`] - a subscriber over any [`QueueClient`] that pulls
//!   in batches and acknowledges in batches
//! - [`MemoryQueue`] - an in-process broker usable on both sides
//! - [`HttpPublisher`] - JSON records posted over HTTP
//! - [`testing`] - recording publisher and scripted subscriber
//!
//! Delivery is at-least-once throughout. Per-message attributes travel on
//! the request context as [`MessageAttributes`].
//!
//! ## Example
//!
//! ```
//! use gizmo_core::RequestContext;
//! use gizmo_pubsub::{
//!     MemoryQueue, PublisherExt, QueueSubscriber, QueueSubscriberConfig, Subscriber,
//!     SubscriberMessage,
//! };
//!
//! # tokio_test::block_on(async {
//! let queue = MemoryQueue::new();
//! queue
//!     .publish(&RequestContext::background(), "greeting", &"hello")
//!     .await
//!     .unwrap();
//!
//! let subscriber = QueueSubscriber::new(queue.clone(), QueueSubscriberConfig::default());
//! let mut stream = subscriber.start().unwrap();
//! let message = stream.recv().await.unwrap();
//! assert_eq!(message.body().as_ref(), br#""hello""#);
//! message.done().await.unwrap();
//! subscriber.stop().await.unwrap();
//! assert_eq!(queue.ack_count(), 1);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo-pubsub/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod http;
pub mod memory;
mod publisher;
pub mod queue;
mod subscriber;
pub mod testing;

pub use error::{PubSubError, PubSubResult};
pub use http::{HttpPublisher, PublishBatch, PublishRecord};
pub use memory::MemoryQueue;
pub use publisher::{
    check_lengths, MessageAttributes, MultiPublisher, MultiPublisherExt, Publisher, PublisherExt,
};
pub use queue::{QueueClient, QueueSubscriber, QueueSubscriberConfig, ReceivedMessage};
pub use subscriber::{MessageStream, Subscriber, SubscriberMessage};
