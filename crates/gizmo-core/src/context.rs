//! Request context types.
//!
//! The [`RequestContext`] carries per-request state from the server's
//! dispatch through HTTP middleware, decoders, business functions and
//! encoders. Well-known values live in dedicated fields; anything else is
//! stored in [`Extensions`], keyed by type so independent crates cannot
//! collide.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gizmo_router::RouteVars;
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

use crate::trace::{CloudTraceContext, CLOUD_TRACE_HEADER};

/// Header consulted first when resolving the caller IP.
const REAL_IP_HEADER: &str = "x-real-ip";

/// Header holding the proxy chain.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log lines for neighbouring requests
/// close together when sorted by id.
///
/// ```
/// use gizmo_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Type-keyed bag of request-scoped values.
///
/// ```
/// use gizmo_core::Extensions;
///
/// #[derive(Debug, PartialEq)]
/// struct Tenant(&'static str);
///
/// let mut ext = Extensions::new();
/// ext.insert(Tenant("acme"));
/// assert_eq!(ext.get::<Tenant>(), Some(&Tenant("acme")));
/// ```
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Returns the value of type `T`, if present.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Removes the value of type `T`. Returns whether one was present.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> bool {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Per-request context.
///
/// A context is built by the server when a request arrives, enriched by the
/// router with route variables, and then handed by value to middleware and
/// endpoint code. It is cheap to clone.
///
/// Code outside a request (background jobs, subscribers) can use
/// [`RequestContext::background`].
///
/// ```
/// use gizmo_core::RequestContext;
///
/// let request = http::Request::builder()
///     .uri("/widgets/7?verbose=1")
///     .header("X-Real-IP", "10.0.0.9")
///     .header("X-Forwarded-For", "1.2.3.4, 10.0.0.9")
///     .body(bytes::Bytes::new())
///     .unwrap();
///
/// let ctx = RequestContext::from_request(&request, Some("127.0.0.1:5000".parse().unwrap()));
/// assert_eq!(ctx.caller_ip(), Some("10.0.0.9"));
/// assert_eq!(ctx.forwarded_for(), Some("1.2.3.4, 10.0.0.9"));
/// assert_eq!(ctx.path(), "/widgets/7");
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    path: String,
    remote_addr: Option<SocketAddr>,
    caller_ip: Option<String>,
    forwarded_for: Option<String>,
    trace: Option<CloudTraceContext>,
    vars: RouteVars,
    span: Span,
    cancellation: CancellationToken,
    started_at: Instant,
    extensions: Extensions,
}

impl RequestContext {
    /// Creates a context that is not tied to any inbound request.
    #[must_use]
    pub fn background() -> Self {
        Self {
            request_id: RequestId::new(),
            method: Method::GET,
            path: String::new(),
            remote_addr: None,
            caller_ip: None,
            forwarded_for: None,
            trace: None,
            vars: RouteVars::new(),
            span: Span::current(),
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
            extensions: Extensions::new(),
        }
    }

    /// Builds the context for an inbound request.
    ///
    /// The caller IP is taken from `X-Real-IP` and falls back to the remote
    /// address. `X-Forwarded-For` is kept verbatim. A valid
    /// `X-Cloud-Trace-Context` header is parsed and recorded on the span.
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let headers = request.headers();
        let request_id = RequestId::new();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let trace = header_str(headers, CLOUD_TRACE_HEADER).and_then(CloudTraceContext::parse);

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %method,
            path = %path,
            trace_id = tracing::field::Empty,
        );
        if let Some(trace) = &trace {
            span.record("trace_id", trace.trace_id.as_str());
        }

        Self {
            request_id,
            method,
            path,
            remote_addr,
            caller_ip: resolve_caller_ip(headers, remote_addr.map(|a| a.ip())),
            forwarded_for: header_str(headers, FORWARDED_FOR_HEADER).map(str::to_string),
            trace,
            vars: RouteVars::new(),
            span,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
            extensions: Extensions::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path, without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the socket address of the peer, when known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns the resolved caller IP.
    #[must_use]
    pub fn caller_ip(&self) -> Option<&str> {
        self.caller_ip.as_deref()
    }

    /// Returns the raw `X-Forwarded-For` value.
    #[must_use]
    pub fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for.as_deref()
    }

    /// Returns the inbound cloud trace context.
    #[must_use]
    pub fn trace(&self) -> Option<&CloudTraceContext> {
        self.trace.as_ref()
    }

    /// Returns the route variables set by the router (empty if none).
    #[must_use]
    pub fn vars(&self) -> &RouteVars {
        &self.vars
    }

    /// Replaces the route variables.
    pub fn set_vars(&mut self, vars: RouteVars) {
        self.vars = vars;
    }

    /// Returns the request-scoped logging span.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Replaces the logging span.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    /// Returns the cancellation token for this request.
    ///
    /// It fires when the client goes away or the server abandons in-flight
    /// work at the end of a timed-out shutdown.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Replaces the cancellation token.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancellation = token;
    }

    /// Returns true once the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns when the request started.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns time elapsed since the request started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the extension bag.
    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns the extension bag mutably.
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Stores an extension value.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(value);
    }

    /// Reads an extension value.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn resolve_caller_ip(headers: &HeaderMap, remote: Option<IpAddr>) -> Option<String> {
    header_str(headers, REAL_IP_HEADER)
        .map(str::to_string)
        .or_else(|| remote.map(|ip| ip.to_string()))
}
