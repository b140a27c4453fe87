//! The endpoint record and its transport pipeline.
//!
//! An [`Endpoint`] is one decoder, one business function, one encoder and an
//! ordered list of [`EndpointOption`] hooks. The typed parts are erased at
//! construction so endpoints with different input and output types can sit
//! in the same route table, and so business middleware can wrap any of them.
//!
//! # Pipeline
//!
//! ```text
//! Before hooks -> decode --err--> encode_error
//!                   |
//!                   v
//!         business middleware -> business --err--> encode_error
//!                                   |
//!                                   v
//!                          encode -> After hooks
//! ```
//!
//! Exactly one of `encode` or `encode_error` produces the response. Finalizer
//! hooks observe the final status.

use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{
    BinaryDecoder, BinaryEncoder, BinaryMessage, Decoder, EmptyDecoder, Encoder, JsonDecoder,
    JsonEncoder, RawDecoder, RawEncoder, ResponseHooks,
};
use crate::context::RequestContext;
use crate::error::{ServiceError, StatusCoder};
use crate::{Request, Response};

/// A type-erased business value.
pub type AnyValue = Box<dyn Any + Send>;

/// A type-erased business function.
pub type BusinessFn = Arc<
    dyn Fn(RequestContext, AnyValue) -> BoxFuture<'static, Result<AnyValue, ServiceError>>
        + Send
        + Sync,
>;

/// Wraps a business function with cross-cutting behaviour.
///
/// Business middleware runs around the business function only; decoding and
/// encoding happen outside it. Middleware sees inputs and outputs as
/// [`AnyValue`] and may downcast them when it cares about a concrete type.
pub type BusinessMiddleware = Arc<dyn Fn(BusinessFn) -> BusinessFn + Send + Sync>;

type DecodeFn =
    Arc<dyn Fn(&RequestContext, Request) -> Result<AnyValue, ServiceError> + Send + Sync>;
type EncodeFn =
    Arc<dyn Fn(&RequestContext, AnyValue) -> Result<Response, ServiceError> + Send + Sync>;
type ErrorEncodeFn = Arc<dyn Fn(&RequestContext, &ServiceError) -> Response + Send + Sync>;

/// Transport-level hooks attached to a single endpoint, run in order.
#[derive(Clone)]
pub enum EndpointOption {
    /// Runs before decoding; may enrich the context from the request.
    Before(Arc<dyn Fn(&mut RequestContext, &Request) + Send + Sync>),
    /// Runs after a successful encode; may add response headers.
    After(Arc<dyn Fn(&RequestContext, &mut HeaderMap) + Send + Sync>),
    /// Replaces the encoder's error rendering.
    ErrorEncoder(Arc<dyn Fn(&RequestContext, &ServiceError) -> Response + Send + Sync>),
    /// Observes the final status of every request.
    Finalizer(Arc<dyn Fn(&RequestContext, StatusCode) + Send + Sync>),
}

impl EndpointOption {
    /// Builds a [`EndpointOption::Before`] hook.
    pub fn before<F>(hook: F) -> Self
    where
        F: Fn(&mut RequestContext, &Request) + Send + Sync + 'static,
    {
        Self::Before(Arc::new(hook))
    }

    /// Builds an [`EndpointOption::After`] hook.
    pub fn after<F>(hook: F) -> Self
    where
        F: Fn(&RequestContext, &mut HeaderMap) + Send + Sync + 'static,
    {
        Self::After(Arc::new(hook))
    }

    /// Builds an [`EndpointOption::ErrorEncoder`] hook.
    pub fn error_encoder<F>(hook: F) -> Self
    where
        F: Fn(&RequestContext, &ServiceError) -> Response + Send + Sync + 'static,
    {
        Self::ErrorEncoder(Arc::new(hook))
    }

    /// Builds an [`EndpointOption::Finalizer`] hook.
    pub fn finalizer<F>(hook: F) -> Self
    where
        F: Fn(&RequestContext, StatusCode) + Send + Sync + 'static,
    {
        Self::Finalizer(Arc::new(hook))
    }
}

impl fmt::Debug for EndpointOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Before(_) => "Before",
            Self::After(_) => "After",
            Self::ErrorEncoder(_) => "ErrorEncoder",
            Self::Finalizer(_) => "Finalizer",
        };
        f.write_str(name)
    }
}

/// Composes business middleware around `business`.
///
/// The first middleware in the slice is the outermost.
#[must_use]
pub fn chain_business(middleware: &[BusinessMiddleware], business: BusinessFn) -> BusinessFn {
    middleware
        .iter()
        .rev()
        .fold(business, |inner, mw| mw(inner))
}

fn downcast<T: 'static>(value: AnyValue) -> Result<T, ServiceError> {
    value.downcast::<T>().map(|v| *v).map_err(|_| {
        ServiceError::internal(format!(
            "business value has an unexpected type, expected {}",
            type_name::<T>()
        ))
    })
}

/// One unit of request handling.
///
/// # Example
///
/// ```
/// use gizmo_core::{Endpoint, RequestContext, ServiceError};
/// use serde_json::{json, Value};
///
/// let echo = Endpoint::json(|_ctx: RequestContext, body: Value| async move {
///     Ok::<_, ServiceError>(body)
/// });
///
/// let request = http::Request::builder()
///     .method("PUT")
///     .uri("/echo")
///     .body(bytes::Bytes::from_static(br#"{"a":1}"#))
///     .unwrap();
///
/// let response = tokio_test::block_on(echo.handle(RequestContext::background(), request));
/// assert_eq!(response.status(), 200);
/// assert_eq!(response.body().as_ref(), br#"{"a":1}"#);
/// ```
#[derive(Clone)]
pub struct Endpoint {
    decode: DecodeFn,
    business: BusinessFn,
    encode: EncodeFn,
    encode_error: ErrorEncodeFn,
    options: Vec<EndpointOption>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Builds an endpoint from explicit parts.
    pub fn new<I, O, D, E, F, Fut>(decoder: D, encoder: E, business: F) -> Self
    where
        I: Send + 'static,
        O: Send + 'static,
        D: Decoder<I>,
        E: Encoder<O>,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ServiceError>> + Send + 'static,
    {
        let decoder = Arc::new(decoder);
        let encoder = Arc::new(encoder);
        let business = Arc::new(business);

        let decode: DecodeFn = Arc::new(move |ctx: &RequestContext, request: Request| {
            Decoder::<I>::decode(&*decoder, ctx, request).map(|input| Box::new(input) as AnyValue)
        });

        let business: BusinessFn = Arc::new(move |ctx: RequestContext, input: AnyValue| {
            let business = Arc::clone(&business);
            async move {
                let input = downcast::<I>(input)?;
                let output = business(ctx, input).await?;
                Ok::<AnyValue, ServiceError>(Box::new(output))
            }
            .boxed()
        });

        let encode_with = Arc::clone(&encoder);
        let encode: EncodeFn = Arc::new(move |ctx: &RequestContext, output: AnyValue| {
            let output = downcast::<O>(output)?;
            encode_with.encode(ctx, output)
        });
        let encode_error: ErrorEncodeFn =
            Arc::new(move |ctx: &RequestContext, err: &ServiceError| {
                Encoder::<O>::encode_error(&*encoder, ctx, err)
            });

        Self {
            decode,
            business,
            encode,
            encode_error,
            options: Vec::new(),
        }
    }

    /// JSON in, JSON out. The default endpoint shape.
    pub fn json<I, O, F, Fut>(business: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + ResponseHooks + Send + 'static,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ServiceError>> + Send + 'static,
    {
        Self::new(JsonDecoder, JsonEncoder, business)
    }

    /// No request body, JSON out.
    pub fn json_no_body<O, F, Fut>(business: F) -> Self
    where
        O: Serialize + ResponseHooks + Send + 'static,
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ServiceError>> + Send + 'static,
    {
        Self::new(EmptyDecoder, JsonEncoder, move |ctx: RequestContext, (): ()| business(ctx))
    }

    /// Length-prefixed binary in and out.
    pub fn binary<I, O, F, Fut>(business: F) -> Self
    where
        I: BinaryMessage,
        O: BinaryMessage + ResponseHooks,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ServiceError>> + Send + 'static,
    {
        Self::new(BinaryDecoder, BinaryEncoder, business)
    }

    /// Raw-handler mode: the function sees the request and writes the
    /// response itself.
    pub fn raw<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(RawDecoder, RawEncoder, move |ctx: RequestContext, request: Request| {
            let handler = Arc::clone(&handler);
            async move { Ok::<_, ServiceError>(handler(ctx, request).await) }
        })
    }

    /// Appends a transport hook.
    #[must_use]
    pub fn option(mut self, option: EndpointOption) -> Self {
        self.options.push(option);
        self
    }

    /// Returns the hooks in order.
    #[must_use]
    pub fn options(&self) -> &[EndpointOption] {
        &self.options
    }

    /// Wraps the business function with `middleware`, first element outermost.
    #[must_use]
    pub fn with_business_middleware(mut self, middleware: &[BusinessMiddleware]) -> Self {
        self.business = chain_business(middleware, self.business);
        self
    }

    /// Returns the erased business function.
    #[must_use]
    pub fn business(&self) -> BusinessFn {
        Arc::clone(&self.business)
    }

    /// Runs the full transport pipeline for one request.
    pub async fn handle(&self, mut ctx: RequestContext, request: Request) -> Response {
        for option in &self.options {
            if let EndpointOption::Before(hook) = option {
                hook(&mut ctx, &request);
            }
        }

        let response = match self.run(&ctx, request).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status_code();
                tracing::debug!(parent: ctx.span(), error = %err, %status, "endpoint error");
                self.render_error(&ctx, &err)
            }
        };

        for option in &self.options {
            if let EndpointOption::Finalizer(hook) = option {
                hook(&ctx, response.status());
            }
        }
        response
    }

    async fn run(&self, ctx: &RequestContext, request: Request) -> Result<Response, ServiceError> {
        let input = (self.decode)(ctx, request)?;
        let output = (self.business)(ctx.clone(), input).await?;
        let mut response = (self.encode)(ctx, output)?;
        for option in &self.options {
            if let EndpointOption::After(hook) = option {
                hook(ctx, response.headers_mut());
            }
        }
        Ok(response)
    }

    fn render_error(&self, ctx: &RequestContext, err: &ServiceError) -> Response {
        let custom = self.options.iter().rev().find_map(|option| match option {
            EndpointOption::ErrorEncoder(render) => Some(render),
            _ => None,
        });
        match custom {
            Some(render) => render(ctx, err),
            None => (self.encode_error)(ctx, err),
        }
    }
}
