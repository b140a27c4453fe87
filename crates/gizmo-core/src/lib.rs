//! # Gizmo Core
//!
//! Core types shared by every Gizmo crate:
//!
//! - [`RequestContext`] - per-request values under typed keys: request id,
//!   logging span, route variables, caller IP, forwarded-for chain, cloud
//!   trace context and cancellation
//! - [`ServiceError`] - error taxonomy with status and header hooks
//! - [`Endpoint`] - one decoder, business function, encoder and option list
//! - [`codec`] - JSON, length-prefixed binary and passthrough codecs

#![doc(html_root_url = "https://docs.rs/gizmo-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codec;
mod context;
mod endpoint;
mod error;
pub mod query;
mod trace;

use bytes::Bytes;

pub use codec::{Decoder, Encoder, ResponseHooks, Reply};
pub use context::{Extensions, RequestContext, RequestId};
pub use endpoint::{
    AnyValue, BusinessFn, BusinessMiddleware, Endpoint, EndpointOption, chain_business,
};
pub use error::{ErrorEnvelope, Headerer, ServiceError, ServiceResult, StatusCoder};
pub use gizmo_router::RouteVars;
pub use query::query_param;
pub use trace::{CloudTraceContext, CLOUD_TRACE_HEADER};

/// HTTP request with a fully buffered body.
pub type Request = http::Request<Bytes>;

/// HTTP response with a fully buffered body.
pub type Response = http::Response<Bytes>;
