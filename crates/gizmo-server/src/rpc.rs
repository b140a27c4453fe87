//! Unary RPC hosting.
//!
//! Calls arrive as HTTP/2 `POST /<service>/<method>` requests with content
//! type `application/grpc` and one length-prefixed message:
//!
//! ```text
//! +------+----------------+-------------------+
//! | flag | length (u32be) | payload           |
//! +------+----------------+-------------------+
//!   1 B         4 B          `length` bytes
//! ```
//!
//! The outcome travels in the `grpc-status` and `grpc-message` trailers.
//! Every method runs behind the server interceptor, which attaches the
//! request span and the service's business middleware, and at most one
//! service-supplied [`UnaryInterceptor`].

use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tracing::Instrument;

use gizmo_core::codec::BinaryMessage;
use gizmo_core::{
    chain_business, AnyValue, BusinessFn, BusinessMiddleware, Request, RequestContext,
    ServiceError, StatusCoder,
};

use crate::error::{ServerError, ServerResult};

/// Content type of RPC requests and responses.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

const MESSAGE_HEADER_LEN: usize = 5;

/// RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    /// Success.
    Ok = 0,
    /// The caller cancelled.
    Cancelled = 1,
    /// Unknown failure.
    Unknown = 2,
    /// The request was malformed.
    InvalidArgument = 3,
    /// The deadline passed.
    DeadlineExceeded = 4,
    /// The entity does not exist.
    NotFound = 5,
    /// The entity already exists.
    AlreadyExists = 6,
    /// The caller is not allowed.
    PermissionDenied = 7,
    /// Quota or rate limit reached.
    ResourceExhausted = 8,
    /// The system is not in a state for the call.
    FailedPrecondition = 9,
    /// Concurrency conflict.
    Aborted = 10,
    /// Out of range.
    OutOfRange = 11,
    /// The method is not implemented.
    Unimplemented = 12,
    /// Internal failure.
    Internal = 13,
    /// The service is unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss.
    DataLoss = 15,
    /// The caller is not authenticated.
    Unauthenticated = 16,
}

impl RpcCode {
    /// Maps an HTTP status to the closest RPC code.
    pub fn from_http(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            412 => Self::FailedPrecondition,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::Internal,
        }
    }

    /// Numeric code written to `grpc-status`.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    /// Status code.
    pub code: RpcCode,
    /// Human-readable message; empty on success.
    pub message: String,
}

impl RpcStatus {
    /// Creates a status.
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Success.
    pub fn ok() -> Self {
        Self::new(RpcCode::Ok, "")
    }

    /// Maps a business or decode error.
    pub fn from_error(error: &ServiceError) -> Self {
        Self::new(RpcCode::from_http(error.status_code()), error.to_string())
    }

    /// The `grpc-status` and `grpc-message` trailers.
    pub fn trailers(&self) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from(self.code.as_u32()));
        if !self.message.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&percent_encode(&self.message)) {
                trailers.insert("grpc-message", value);
            }
        }
        trailers
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for byte in message.bytes() {
        if (0x20..0x7f).contains(&byte) && byte != b'%' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Frames one uncompressed message.
pub fn encode_message(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_LEN + payload.len());
    buf.put_u8(0);
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Unframes a request body holding exactly one message.
pub fn decode_message(mut body: Bytes) -> Result<Bytes, RpcStatus> {
    if body.len() < MESSAGE_HEADER_LEN {
        return Err(RpcStatus::new(
            RpcCode::InvalidArgument,
            "message shorter than its header",
        ));
    }
    let header = body.split_to(MESSAGE_HEADER_LEN);
    if header[0] != 0 {
        return Err(RpcStatus::new(
            RpcCode::Unimplemented,
            "compressed messages are not supported",
        ));
    }
    let declared = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if declared != body.len() {
        return Err(RpcStatus::new(
            RpcCode::InvalidArgument,
            format!("message declares {declared} bytes but carries {}", body.len()),
        ));
    }
    Ok(body)
}

type RpcDecodeFn = Arc<dyn Fn(Bytes) -> Result<AnyValue, ServiceError> + Send + Sync>;
type RpcEncodeFn = Arc<dyn Fn(AnyValue) -> Result<Bytes, ServiceError> + Send + Sync>;

fn downcast<T: 'static>(value: AnyValue) -> Result<T, ServiceError> {
    value.downcast::<T>().map(|v| *v).map_err(|_| {
        ServiceError::internal(format!("rpc value is not a {}", type_name::<T>()))
    })
}

/// One unary method: message decoder, business function, message encoder.
#[derive(Clone)]
pub struct RpcMethod {
    decode: RpcDecodeFn,
    business: BusinessFn,
    encode: RpcEncodeFn,
}

impl fmt::Debug for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMethod").finish_non_exhaustive()
    }
}

impl RpcMethod {
    /// Builds a method from a typed business function.
    pub fn unary<I, O, F, Fut>(business: F) -> Self
    where
        I: BinaryMessage,
        O: BinaryMessage,
        F: Fn(RequestContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, ServiceError>> + Send + 'static,
    {
        let business = Arc::new(business);
        Self {
            decode: Arc::new(|bytes: Bytes| I::from_bytes(bytes).map(|i| Box::new(i) as AnyValue)),
            business: Arc::new(move |ctx: RequestContext, input: AnyValue| {
                let business = Arc::clone(&business);
                async move {
                    let input = downcast::<I>(input)?;
                    let output = business(ctx, input).await?;
                    Ok::<AnyValue, ServiceError>(Box::new(output))
                }
                .boxed()
            }),
            encode: Arc::new(|output: AnyValue| downcast::<O>(output).map(|o| o.to_bytes())),
        }
    }
}

/// A service-supplied wrapper around every call of one service.
pub trait UnaryInterceptor: Send + Sync + 'static {
    /// Runs around `next`. `method` is the full `/<service>/<method>` path.
    fn intercept(
        &self,
        ctx: RequestContext,
        method: &str,
        input: AnyValue,
        next: BusinessFn,
    ) -> BoxFuture<'static, Result<AnyValue, ServiceError>>;
}

/// A named set of unary methods.
#[derive(Clone)]
pub struct RpcService {
    name: String,
    methods: BTreeMap<String, RpcMethod>,
    interceptors: Vec<Arc<dyn UnaryInterceptor>>,
}

impl fmt::Debug for RpcService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcService")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl RpcService {
    /// Creates a service, e.g. `widgets.v1.Widgets`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: BTreeMap::new(),
            interceptors: Vec::new(),
        }
    }

    /// Adds a method.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, method: RpcMethod) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    /// Adds a unary interceptor. Only one is accepted at registration.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl UnaryInterceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method names in order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Request path of `method`.
    pub fn path(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }

    /// Rejects more than one service interceptor.
    pub fn validate(&self) -> ServerResult<()> {
        if self.interceptors.len() > 1 {
            return Err(ServerError::registration(format!(
                "rpc service {} supplies {} unary interceptors, at most one is allowed",
                self.name,
                self.interceptors.len()
            )));
        }
        Ok(())
    }
}

struct RpcRoute {
    decode: RpcDecodeFn,
    call: BusinessFn,
    encode: RpcEncodeFn,
}

/// The registered methods of every service, keyed by path.
#[derive(Default)]
pub(crate) struct RpcHost {
    routes: HashMap<String, Arc<RpcRoute>>,
}

impl RpcHost {
    pub(crate) fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn register(
        &mut self,
        service: &RpcService,
        business_middleware: &[BusinessMiddleware],
    ) -> ServerResult<()> {
        service.validate()?;
        let interceptor = service.interceptors.first().cloned();

        for (name, method) in &service.methods {
            let path = service.path(name);
            if self.routes.contains_key(&path) {
                return Err(ServerError::registration(format!(
                    "rpc method {path} registered twice"
                )));
            }
            let inner = match &interceptor {
                Some(interceptor) => intercepted(
                    Arc::clone(interceptor),
                    path.clone(),
                    method.business.clone(),
                ),
                None => method.business.clone(),
            };
            let route = RpcRoute {
                decode: Arc::clone(&method.decode),
                call: chain_business(business_middleware, inner),
                encode: Arc::clone(&method.encode),
            };
            self.routes.insert(path, Arc::new(route));
        }
        Ok(())
    }

    /// Runs one call. The returned future does not borrow the host.
    pub(crate) fn call(
        &self,
        ctx: RequestContext,
        request: Request,
    ) -> BoxFuture<'static, RpcReply> {
        let route = self.routes.get(request.uri().path()).cloned();
        let content_type_ok = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(GRPC_CONTENT_TYPE));

        async move {
            if !content_type_ok {
                return RpcReply::http_error(StatusCode::UNSUPPORTED_MEDIA_TYPE);
            }
            let Some(route) = route else {
                return RpcReply::status(RpcStatus::new(
                    RpcCode::Unimplemented,
                    format!("unknown method {}", request.uri().path()),
                ));
            };
            let span = ctx.span().clone();
            match route.run(ctx, request.into_body()).instrument(span).await {
                Ok(message) => RpcReply::message(message),
                Err(status) => RpcReply::status(status),
            }
        }
        .boxed()
    }
}

impl RpcRoute {
    async fn run(&self, ctx: RequestContext, body: Bytes) -> Result<Bytes, RpcStatus> {
        let payload = decode_message(body)?;
        let input = (self.decode)(payload).map_err(|e| RpcStatus::from_error(&e))?;
        let output = (self.call)(ctx, input)
            .await
            .map_err(|e| RpcStatus::from_error(&e))?;
        let bytes = (self.encode)(output).map_err(|e| RpcStatus::from_error(&e))?;
        Ok(encode_message(&bytes))
    }
}

fn intercepted(
    interceptor: Arc<dyn UnaryInterceptor>,
    method: String,
    next: BusinessFn,
) -> BusinessFn {
    Arc::new(move |ctx: RequestContext, input: AnyValue| {
        interceptor.intercept(ctx, &method, input, Arc::clone(&next))
    })
}

/// The result of one call before it is written to the wire.
#[derive(Debug, Clone)]
pub struct RpcReply {
    /// HTTP status; 200 unless the request was not an RPC at all.
    pub http_status: StatusCode,
    /// The framed response message, absent on failure.
    pub message: Option<Bytes>,
    /// Final status, sent as trailers.
    pub status: RpcStatus,
}

impl RpcReply {
    /// A successful reply carrying one framed message.
    pub fn message(message: Bytes) -> Self {
        Self {
            http_status: StatusCode::OK,
            message: Some(message),
            status: RpcStatus::ok(),
        }
    }

    /// A reply with no message.
    pub fn status(status: RpcStatus) -> Self {
        Self {
            http_status: StatusCode::OK,
            message: None,
            status,
        }
    }

    /// A reply rejected at the HTTP level.
    pub fn http_error(http_status: StatusCode) -> Self {
        Self {
            http_status,
            message: None,
            status: RpcStatus::new(RpcCode::Internal, "not an rpc request"),
        }
    }

    /// Size of the framed message, zero when absent.
    pub fn message_len(&self) -> usize {
        self.message.as_ref().map_or(0, Bytes::len)
    }

    /// Converts into a streaming response ending with the status trailers.
    pub fn into_response(self) -> http::Response<BoxBody<Bytes, Infallible>> {
        let mut frames: Vec<Result<Frame<Bytes>, Infallible>> = Vec::with_capacity(2);
        if let Some(message) = self.message {
            frames.push(Ok(Frame::data(message)));
        }
        frames.push(Ok(Frame::trailers(self.status.trailers())));

        let body = StreamBody::new(futures_util::stream::iter(frames)).boxed();
        let mut response = http::Response::new(body);
        *response.status_mut() = self.http_status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
        response
    }
}
