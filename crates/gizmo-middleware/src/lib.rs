//! # Gizmo Middleware
//!
//! HTTP middleware for Gizmo services.
//!
//! A [`Middleware`] wraps the endpoint handler and receives the
//! [`RequestContext`](gizmo_core::RequestContext), the request and a [`Next`]
//! to continue the chain. A [`Pipeline`] runs stages in the order they were
//! added:
//!
//! ```text
//! Request → Cors → NoCache → Jsonp → Handler
//!                                       ↓
//! Response ← Cors ← NoCache ← Jsonp ←───┘
//! ```
//!
//! ## Example
//!
//! ```
//! use gizmo_middleware::stages::{Cors, Jsonp, NoCache};
//! use gizmo_middleware::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .stage(Cors::with_origin_suffix(".example.com"))
//!     .stage(NoCache)
//!     .stage(Jsonp)
//!     .build();
//!
//! assert_eq!(pipeline.stage_names(), vec!["cors", "no_cache", "jsonp"]);
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod middleware;
pub mod pipeline;
pub mod stages;

pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
