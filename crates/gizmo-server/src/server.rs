//! The server: listeners, default endpoints, request dispatch and lifecycle.
//!
//! ```text
//!   created ──start──▶ started ──stop──▶ stopping ──▶ stopped
//! ```
//!
//! Stopping runs in a fixed order:
//!
//! 1. The [`ActivityMonitor`] starts draining; new requests get 503.
//! 2. The health check turns not-ready and waits, bounded by the shutdown
//!    timeout, until in-flight requests finish (and, for the load balancer
//!    check, until every caller has seen the not-ready state).
//! 3. Listeners close and open connections shut down gracefully.
//! 4. Access log writers are flushed.
//!
//! A drain that runs out of time cancels every in-flight request context,
//! closes connections at once, and makes `stop` return
//! [`ServerError::ShutdownTimeout`].

use std::any::Any;
use std::backtrace::Backtrace;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use futures_util::FutureExt;
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_appender::non_blocking::WorkerGuard;

use gizmo_config::ServerConfig;
use gizmo_core::codec::{error_response, text_response};
use gizmo_core::{Request, RequestContext, Response, ServiceError};
use gizmo_middleware::stages::{AccessLog, AccessRecord, Cors};
use gizmo_middleware::Pipeline;
use gizmo_router::MethodFilter;
use gizmo_telemetry::{ErrorReport, ErrorReporter, MetricsRegistry};

use crate::activity::ActivityMonitor;
use crate::error::{ServerError, ServerResult};
use crate::health::{self, HealthCheck};
use crate::pprof;
use crate::router::{handler_fn, ok_text, Handler, RouterKind, ServerRouter};
use crate::rpc::{RpcCode, RpcHost, RpcReply, RpcStatus};
use crate::service::{join_path, Service};
use crate::shutdown::{wait_for_os_signal, ConnectionTracker, ShutdownSignal};
use crate::tls;

/// Platform warm-up probe, always answered with `OK`.
pub const WARMUP_PATH: &str = "/_ah/warmup";

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body of the 500 answered when a handler panics.
pub const PANIC_BODY: &str = "unexpected server error";

type ResponseBody = BoxBody<Bytes, Infallible>;

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Built, accepting registrations.
    Created,
    /// Serving.
    Started,
    /// `stop` is running.
    Stopping,
    /// Stopped with the given outcome.
    Stopped(ServerResult<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http,
    Rpc,
}

struct Inner {
    config: ServerConfig,
    state: Mutex<ServerState>,
    router: RwLock<ServerRouter>,
    rpc: RwLock<RpcHost>,
    health: Arc<dyn HealthCheck>,
    monitor: ActivityMonitor,
    metrics: MetricsRegistry,
    reporter: Option<Arc<dyn ErrorReporter>>,
    layers: Pipeline,
    rpc_access_log: Option<AccessLog>,
    log_guards: Mutex<Vec<WorkerGuard>>,
    http_listener: Mutex<Option<StdTcpListener>>,
    http_addr: SocketAddr,
    rpc_addr: Mutex<Option<SocketAddr>>,
    tls: Option<TlsAcceptor>,
    shutdown: ShutdownSignal,
    stop_requested: ShutdownSignal,
    connections: ConnectionTracker,
    accept_tasks: Mutex<Vec<JoinHandle<()>>>,
    accept_error: Mutex<Option<ServerError>>,
    root: CancellationToken,
    outcome: watch::Sender<Option<ServerResult<()>>>,
}

/// Identifies a request in panic reports.
struct RequestLabel {
    request_id: String,
    method: String,
    path: String,
}

impl RequestLabel {
    fn of(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id().to_string(),
            method: ctx.method().to_string(),
            path: ctx.path().to_string(),
        }
    }
}

/// An HTTP and RPC server.
///
/// Cloning is cheap; clones control the same server.
///
/// ```no_run
/// use gizmo_config::ServerConfig;
/// use gizmo_server::Server;
///
/// # async fn example() -> gizmo_server::ServerResult<()> {
/// let server = Server::new(ServerConfig::default())?;
/// server.run().await
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("http_addr", &self.inner.http_addr)
            .field("state", &*self.inner.state.lock())
            .field("router", &*self.inner.router.read())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    router: RouterKind,
    health: Option<Arc<dyn HealthCheck>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("custom_health_check", &self.health.is_some())
            .field("error_reporter", &self.reporter.is_some())
            .finish()
    }
}

impl ServerBuilder {
    /// Starts from a configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: RouterKind::default(),
            health: None,
            reporter: None,
        }
    }

    /// Chooses the route table.
    #[must_use]
    pub fn router(mut self, kind: RouterKind) -> Self {
        self.router = kind;
        self
    }

    /// Uses `check` instead of the configured health check kind.
    #[must_use]
    pub fn health_check(mut self, check: impl HealthCheck) -> Self {
        self.health = Some(Arc::new(check));
        self
    }

    /// Sends recovered panics to `reporter`.
    #[must_use]
    pub fn error_reporter(mut self, reporter: impl ErrorReporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Validates the configuration, binds the HTTP listener and installs
    /// the default endpoints.
    pub fn build(self) -> ServerResult<Server> {
        let config = self.config;
        config.validate()?;

        let metrics = MetricsRegistry::install(&config.metrics_config())?;
        let health = match self.health {
            Some(check) => check,
            None => health::from_config(&config)?,
        };
        let tls = config
            .tls()
            .map(|settings| tls::acceptor(settings.cert, settings.key))
            .transpose()?;

        let http_listener = bind(&config.http_bind_addr())?;
        let http_addr = http_listener.local_addr()?;

        let mut log_guards = Vec::new();
        let mut layers = Pipeline::builder();
        if let Some((log, guard)) = AccessLog::open(&config.http_access_log)? {
            layers = layers.stage(log);
            log_guards.push(guard);
        }
        if let Some(suffix) = &config.cors_origin_suffix {
            layers = layers.stage(Cors::with_origin_suffix(suffix.clone()));
        }
        let rpc_access_log = match AccessLog::open(&config.rpc_access_log)? {
            Some((log, guard)) => {
                log_guards.push(guard);
                Some(log)
            }
            None => None,
        };

        let mut router = ServerRouter::new(self.router);
        router.handle_fn(Method::GET, WARMUP_PATH, |_ctx: RequestContext, _request: Request| async {
            ok_text("OK")
        })?;
        if config.enable_pprof {
            pprof::register(&mut router)?;
        }
        if !metrics.path().is_empty() {
            let exposition = metrics.clone();
            router.handle(
                Method::GET,
                metrics.path(),
                handler_fn(move |_ctx: RequestContext, _request: Request| {
                    let body = exposition.render();
                    async move { metrics_response(body) }
                }),
            )?;
        }

        tracing::info!(
            server = %config.server_name,
            addr = %http_addr,
            health_path = health.path(),
            tls = tls.is_some(),
            "server created"
        );

        let (outcome, _) = watch::channel(None);
        Ok(Server {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ServerState::Created),
                router: RwLock::new(router),
                rpc: RwLock::new(RpcHost::default()),
                health,
                monitor: ActivityMonitor::new(),
                metrics,
                reporter: self.reporter,
                layers: layers.build(),
                rpc_access_log,
                log_guards: Mutex::new(log_guards),
                http_listener: Mutex::new(Some(http_listener)),
                http_addr,
                rpc_addr: Mutex::new(None),
                tls,
                shutdown: ShutdownSignal::new(),
                stop_requested: ShutdownSignal::new(),
                connections: ConnectionTracker::new(),
                accept_tasks: Mutex::new(Vec::new()),
                accept_error: Mutex::new(None),
                root: CancellationToken::new(),
                outcome,
            }),
        })
    }
}

fn bind(addr: &str) -> ServerResult<StdTcpListener> {
    let listener = StdTcpListener::bind(addr).map_err(|e| ServerError::bind(addr, &e))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::bind(addr, &e))?;
    Ok(listener)
}

fn metrics_response(body: String) -> Response {
    let mut response = text_response(StatusCode::OK, body);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

impl Server {
    /// Builds a server with the configured health check and pattern router.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        ServerBuilder::new(config).build()
    }

    /// Starts a builder.
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bound HTTP address.
    pub fn http_addr(&self) -> SocketAddr {
        self.inner.http_addr
    }

    /// Bound RPC address, once started with an RPC service.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        *self.inner.rpc_addr.lock()
    }

    /// In-flight request counter.
    pub fn monitor(&self) -> &ActivityMonitor {
        &self.inner.monitor
    }

    /// The health check.
    pub fn health_check(&self) -> &dyn HealthCheck {
        self.inner.health.as_ref()
    }

    /// Metrics registry.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.inner.metrics
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.state.lock().clone()
    }

    fn created(&self) -> ServerResult<MutexGuard<'_, ServerState>> {
        let state = self.inner.state.lock();
        if *state == ServerState::Created {
            Ok(state)
        } else {
            Err(ServerError::registration(
                "cannot register routes once the server has started",
            ))
        }
    }

    /// Mounts a service's routes and RPC methods.
    pub fn register<S: Service + ?Sized>(&self, service: &S) -> ServerResult<()> {
        let _created = self.created()?;

        let pipeline = Arc::new(service.middleware());
        let business = service.business_middleware();
        let routes = service.routes();
        let route_count = routes.len();
        {
            let mut router = self.inner.router.write();
            for route in routes {
                let path = join_path(service.prefix(), &route.path);
                let endpoint = Arc::new(route.endpoint.with_business_middleware(&business));
                let handler = endpoint_handler(Arc::clone(&pipeline), endpoint);
                router.handle(route.method, &path, handler)?;
            }
        }

        let rpc = service.rpc();
        if let Some(rpc) = &rpc {
            self.inner.rpc.write().register(rpc, &business)?;
        }

        tracing::info!(
            service = service.name(),
            routes = route_count,
            rpc = rpc.as_ref().map(|r| r.name()),
            "service registered"
        );
        Ok(())
    }

    /// Mounts a raw handler.
    pub fn handle(
        &self,
        method: impl Into<MethodFilter>,
        path: &str,
        handler: Handler,
    ) -> ServerResult<()> {
        let _created = self.created()?;
        self.inner.router.write().handle(method, path, handler)
    }

    /// Mounts an async function as a raw handler.
    pub fn handle_fn<F, Fut>(
        &self,
        method: impl Into<MethodFilter>,
        path: &str,
        f: F,
    ) -> ServerResult<()>
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.handle(method, path, handler_fn(f))
    }

    /// Replaces the not-found handler (pattern router only).
    pub fn set_not_found(&self, handler: Handler) -> ServerResult<()> {
        let _created = self.created()?;
        self.inner.router.write().set_not_found(handler)
    }

    /// Starts serving. Installs the health route unless one was
    /// registered, and binds the RPC listener when a service has RPC
    /// methods.
    #[allow(clippy::unused_async)]
    pub async fn start(&self) -> ServerResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if *state != ServerState::Created {
            return Err(ServerError::AlreadyStarted);
        }

        let rpc_listener = if inner.rpc.read().is_empty() {
            None
        } else {
            Some(bind(&inner.config.rpc_bind_addr())?)
        };
        let http_listener = inner
            .http_listener
            .lock()
            .take()
            .ok_or(ServerError::AlreadyStarted)?;

        {
            let mut router = inner.router.write();
            let path = inner.health.path().to_string();
            if !router.has_path(&path) {
                let check = Arc::clone(&inner.health);
                router.handle(
                    Method::GET,
                    &path,
                    Arc::new(move |ctx: RequestContext, request: Request| {
                        let check = Arc::clone(&check);
                        async move { check.serve(ctx, request).await }.boxed()
                    }),
                )?;
            }
        }
        inner.health.start(inner.monitor.clone());

        let mut tasks = inner.accept_tasks.lock();
        let http = TcpListener::from_std(http_listener)?;
        tasks.push(tokio::spawn(accept_loop(Arc::clone(inner), http, Protocol::Http)));

        if let Some(listener) = rpc_listener {
            let addr = listener.local_addr()?;
            let listener = TcpListener::from_std(listener)?;
            *inner.rpc_addr.lock() = Some(addr);
            tasks.push(tokio::spawn(accept_loop(Arc::clone(inner), listener, Protocol::Rpc)));
        }

        *state = ServerState::Started;
        tracing::info!(
            http = %inner.http_addr,
            rpc = ?*inner.rpc_addr.lock(),
            "server started"
        );
        Ok(())
    }

    /// Drains and stops the server.
    ///
    /// Returns `Ok` after a graceful drain and
    /// [`ServerError::ShutdownTimeout`] when the drain ran out of time.
    /// Later calls return [`ServerError::AlreadyStopped`], or the same
    /// error when the first stop failed.
    pub async fn stop(&self) -> ServerResult<()> {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            match &*state {
                ServerState::Created => return Err(ServerError::NotStarted),
                ServerState::Stopping | ServerState::Stopped(Ok(())) => {
                    return Err(ServerError::AlreadyStopped)
                }
                ServerState::Stopped(Err(e)) => return Err(e.clone()),
                ServerState::Started => {}
            }
            *state = ServerState::Stopping;
        }
        inner.stop_requested.trigger();

        let started = Instant::now();
        tracing::info!(in_flight = inner.monitor.count(), "server stopping");

        inner.monitor.start_draining();
        let timeout = inner.config.shutdown_timeout;
        let drained = match tokio::time::timeout(timeout, inner.health.stop()).await {
            Ok(result) => result,
            Err(_) => Err(ServerError::ShutdownTimeout {
                timeout,
                active: inner.monitor.count(),
            }),
        };
        if let Err(e) = &drained {
            tracing::warn!(error = %e, "drain incomplete, cancelling in-flight requests");
            inner.root.cancel();
        }

        inner.shutdown.trigger();
        let tasks = std::mem::take(&mut *inner.accept_tasks.lock());
        let aborts: Vec<AbortHandle> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let budget = inner.config.shutdown_timeout.saturating_sub(started.elapsed());
        let closing = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::debug!(error = %e, "accept loop ended abnormally");
                }
            }
            inner.connections.wait_idle().await;
        };
        if tokio::time::timeout(budget, closing).await.is_err() {
            tracing::warn!(
                connections = inner.connections.active_connections(),
                "closing connections forcibly"
            );
            inner.root.cancel();
            for abort in aborts {
                abort.abort();
            }
        }

        drop(std::mem::take(&mut *inner.log_guards.lock()));

        let accept_error = inner.accept_error.lock().take();
        let outcome = match (drained, accept_error) {
            (Err(e), _) | (Ok(()), Some(e)) => Err(e),
            (Ok(()), None) => Ok(()),
        };
        *inner.state.lock() = ServerState::Stopped(outcome.clone());
        inner.outcome.send_replace(Some(outcome.clone()));

        match &outcome {
            Ok(()) => tracing::info!(elapsed_ms = started.elapsed().as_millis(), "server stopped"),
            Err(e) => tracing::error!(error = %e, "server stopped with error"),
        }
        outcome
    }

    /// Completes when the server has stopped, with the stop outcome.
    pub async fn wait_stopped(&self) -> ServerResult<()> {
        let mut outcome = self.inner.outcome.subscribe();
        loop {
            let current = outcome.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if outcome.changed().await.is_err() {
                return Err(ServerError::AlreadyStopped);
            }
        }
    }

    /// Starts, waits for SIGTERM or SIGINT (or a self-initiated stop), then
    /// stops.
    pub async fn run(&self) -> ServerResult<()> {
        self.start().await?;

        tokio::select! {
            signal = wait_for_os_signal() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "cannot listen for termination signals");
                }
                // A concurrent stop wins; its outcome is read below.
                let _ = self.stop().await;
            }
            () = self.inner.stop_requested.cancelled() => {}
        }
        self.wait_stopped().await
    }

    /// Runs one HTTP request through the full server pipeline without a
    /// socket.
    pub async fn dispatch(&self, request: Request, remote: Option<SocketAddr>) -> Response {
        let inner = &self.inner;
        let mut ctx = RequestContext::from_request(&request, remote);
        ctx.set_cancellation(inner.root.child_token());
        let span = ctx.span().clone();
        let request_id = ctx.request_id().to_string();
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started = Instant::now();

        let mut response = async {
            let _activity = if path == inner.health.path() {
                None
            } else {
                match inner.monitor.try_enter() {
                    Some(guard) => Some(guard),
                    None => return draining_response(),
                }
            };
            let _in_flight = inner.metrics.in_flight();

            let routed = Arc::clone(inner);
            inner
                .layers
                .process(&mut ctx, request, move |ctx: &mut RequestContext, request: Request| {
                    let ctx = ctx.clone();
                    async move { routed.route(ctx, request).await }.boxed()
                })
                .await
        }
        .instrument(span.clone())
        .await;

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        let elapsed = started.elapsed();
        let status = response.status().as_u16();
        inner
            .metrics
            .record_request(method.as_str(), &path, status, elapsed);
        tracing::debug!(
            parent: &span,
            status,
            latency_ms = elapsed.as_millis(),
            "request completed"
        );
        response
    }

    /// Runs one RPC call through the full server pipeline without a socket.
    pub async fn dispatch_rpc(&self, request: Request, remote: Option<SocketAddr>) -> RpcReply {
        let inner = &self.inner;
        let mut ctx = RequestContext::from_request(&request, remote);
        ctx.set_cancellation(inner.root.child_token());
        let span = ctx.span().clone();
        let label = RequestLabel::of(&ctx);
        let time = Local::now();
        let started = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();
        let version = request.version();
        let user_agent = request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let host = remote.map_or_else(|| "-".to_string(), |addr| addr.ip().to_string());

        let reply = async {
            let Some(_activity) = inner.monitor.try_enter() else {
                return RpcReply::status(RpcStatus::new(
                    RpcCode::Unavailable,
                    "server is shutting down",
                ));
            };
            let call = inner.rpc.read().call(ctx, request);
            match bounded(inner.config.write_timeout, AssertUnwindSafe(call).catch_unwind()).await {
                Some(Ok(reply)) => reply,
                Some(Err(payload)) => {
                    inner.report_panic(payload.as_ref(), label);
                    RpcReply::status(RpcStatus::new(RpcCode::Internal, PANIC_BODY))
                }
                None => {
                    RpcReply::status(RpcStatus::new(RpcCode::DeadlineExceeded, "call timed out"))
                }
            }
        }
        .instrument(span.clone())
        .await;

        let elapsed = started.elapsed();
        inner
            .metrics
            .record_rpc(uri.path(), reply.status.code.as_u32(), elapsed);
        if let Some(log) = &inner.rpc_access_log {
            log.write(&AccessRecord {
                host: &host,
                user: "-",
                time,
                method: &method,
                uri: &uri,
                version,
                status: reply.http_status.as_u16(),
                size: reply.message_len(),
                referer: None,
                user_agent: user_agent.as_deref(),
            });
        }
        tracing::debug!(
            parent: &span,
            code = reply.status.code.as_u32(),
            latency_ms = elapsed.as_millis(),
            "rpc completed"
        );
        reply
    }
}

fn endpoint_handler(pipeline: Arc<Pipeline>, endpoint: Arc<gizmo_core::Endpoint>) -> Handler {
    Arc::new(move |mut ctx: RequestContext, request: Request| {
        let pipeline = Arc::clone(&pipeline);
        let endpoint = Arc::clone(&endpoint);
        async move {
            pipeline
                .process(&mut ctx, request, move |ctx: &mut RequestContext, request: Request| {
                    let ctx = ctx.clone();
                    async move { endpoint.handle(ctx, request).await }.boxed()
                })
                .await
        }
        .boxed()
    })
}

fn draining_response() -> Response {
    error_response(&ServiceError::unavailable("server is shutting down"))
}

/// Runs `future` to completion, or until `limit` passes when it is not zero.
async fn bounded<F: Future>(limit: Duration, future: F) -> Option<F::Output> {
    if limit.is_zero() {
        Some(future.await)
    } else {
        tokio::time::timeout(limit, future).await.ok()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with a non-string payload".to_string())
}

impl Inner {
    async fn route(self: Arc<Self>, mut ctx: RequestContext, request: Request) -> Response {
        let (handler, vars) = self
            .router
            .read()
            .resolve(request.method(), request.uri().path());
        ctx.set_vars(vars);

        let label = RequestLabel::of(&ctx);
        let run = AssertUnwindSafe(async move { handler(ctx, request).await }).catch_unwind();
        match bounded(self.config.write_timeout, run).await {
            Some(Ok(response)) => response,
            Some(Err(payload)) => {
                self.report_panic(payload.as_ref(), label);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, PANIC_BODY)
            }
            None => {
                tracing::warn!(path = %label.path, "handler timed out");
                error_response(&ServiceError::status(
                    StatusCode::GATEWAY_TIMEOUT,
                    "handler execution timed out",
                ))
            }
        }
    }

    fn report_panic(&self, payload: &(dyn Any + Send), label: RequestLabel) {
        let message = panic_message(payload);
        let backtrace = Backtrace::force_capture().to_string();
        tracing::error!(
            request_id = %label.request_id,
            panic = %message,
            backtrace = %backtrace,
            "recovered from handler panic"
        );
        self.metrics.record_panic();

        if let Some(reporter) = &self.reporter {
            let reporter = Arc::clone(reporter);
            let report = ErrorReport::new(message).with_backtrace(backtrace).with_request(
                label.request_id,
                label.method,
                label.path,
            );
            tokio::spawn(async move { reporter.report(report).await });
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener, protocol: Protocol) {
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => spawn_connection(&inner, stream, remote, protocol),
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "transient accept error");
                }
                Err(e) if is_resource_exhausted(&e) => {
                    tracing::warn!(error = %e, "accept failed, out of descriptors");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    accept_failed(&inner, &e, protocol);
                    break;
                }
            },
        }
    }
    tracing::debug!(?protocol, "listener closed");
}

// Records the error as the stop outcome and stops the server in the
// background.
fn accept_failed(inner: &Arc<Inner>, error: &std::io::Error, protocol: Protocol) {
    tracing::error!(%error, ?protocol, "accept failed, stopping server");
    *inner.accept_error.lock() = Some(ServerError::Accept(error.to_string()));
    let server = Server {
        inner: Arc::clone(inner),
    };
    tokio::spawn(async move {
        if let Err(e) = server.stop().await {
            tracing::debug!(error = %e, "self-initiated stop finished");
        }
    });
}

fn is_transient(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

// EMFILE and ENFILE.
fn is_resource_exhausted(error: &std::io::Error) -> bool {
    matches!(error.raw_os_error(), Some(23 | 24))
}

fn spawn_connection(inner: &Arc<Inner>, stream: TcpStream, remote: SocketAddr, protocol: Protocol) {
    let token = inner.connections.acquire();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let _token = token;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%remote, error = %e, "failed to set TCP_NODELAY");
        }
        match inner.tls.clone() {
            Some(acceptor) => {
                match bounded(inner.config.read_timeout, acceptor.accept(stream)).await {
                    Some(Ok(tls)) => {
                        serve_connection(inner, TokioIo::new(tls), remote, protocol).await;
                    }
                    Some(Err(e)) => tracing::debug!(%remote, error = %e, "tls handshake failed"),
                    None => tracing::debug!(%remote, "tls handshake timed out"),
                }
            }
            None => serve_connection(inner, TokioIo::new(stream), remote, protocol).await,
        }
    });
}

async fn serve_connection<I>(
    inner: Arc<Inner>,
    io: TokioIo<I>,
    remote: SocketAddr,
    protocol: Protocol,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = &inner.config;
    let mut builder = auto::Builder::new(TokioExecutor::new());
    {
        let mut http1 = builder.http1();
        http1.timer(TokioTimer::new()).max_buf_size(config.max_header_bytes.max(8192));
        if !config.read_timeout.is_zero() {
            http1.header_read_timeout(config.read_timeout);
        }
    }
    {
        let mut http2 = builder.http2();
        http2
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(config.max_header_bytes).unwrap_or(u32::MAX));
        if !config.idle_timeout.is_zero() {
            http2.keep_alive_interval(config.idle_timeout);
        }
    }
    if protocol == Protocol::Rpc {
        builder = builder.http2_only();
    }

    let service_inner = Arc::clone(&inner);
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let inner = Arc::clone(&service_inner);
        async move { Ok::<_, Infallible>(handle(inner, request, remote, protocol).await) }
    });

    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%remote, error = %e, "connection error");
            }
            return;
        }
        () = inner.shutdown.cancelled() => conn.as_mut().graceful_shutdown(),
    }

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(%remote, error = %e, "connection error during shutdown");
            }
        }
        () = inner.root.cancelled() => tracing::debug!(%remote, "connection closed forcibly"),
    }
}

async fn handle(
    inner: Arc<Inner>,
    request: hyper::Request<Incoming>,
    remote: SocketAddr,
    protocol: Protocol,
) -> http::Response<ResponseBody> {
    let (parts, body) = request.into_parts();
    let body = match bounded(inner.config.read_timeout, body.collect()).await {
        Some(Ok(collected)) => collected.to_bytes(),
        Some(Err(e)) => {
            tracing::debug!(%remote, error = %e, "failed to read request body");
            return full(error_response(&ServiceError::bad_request(format!(
                "failed to read request body: {e}"
            ))));
        }
        None => {
            return full(error_response(&ServiceError::status(
                StatusCode::REQUEST_TIMEOUT,
                "request body read timed out",
            )))
        }
    };

    let request = Request::from_parts(parts, body);
    let server = Server { inner };
    match protocol {
        Protocol::Http => full(server.dispatch(request, Some(remote)).await),
        Protocol::Rpc => server.dispatch_rpc(request, Some(remote)).await.into_response(),
    }
}

fn full(response: Response) -> http::Response<ResponseBody> {
    response.map(|body| Full::new(body).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CustomHealthCheck;
    use crate::rpc::{decode_message, encode_message, RpcMethod, RpcService, GRPC_CONTENT_TYPE};
    use crate::service::{Route, ServiceDef};
    use futures_util::future::BoxFuture;
    use gizmo_config::HealthCheckKind;
    use gizmo_core::Endpoint;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    fn config() -> ServerConfig {
        ServerConfig {
            http_port: 0,
            rpc_port: 0,
            health_check_type: HealthCheckKind::Simple,
            shutdown_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..ServerConfig::default()
        }
    }

    fn get(path: &str) -> Request {
        http::Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    fn body(response: &Response) -> &str {
        std::str::from_utf8(response.body()).unwrap()
    }

    struct ChannelReporter(mpsc::UnboundedSender<ErrorReport>);

    impl ErrorReporter for ChannelReporter {
        fn report(&self, report: ErrorReport) -> BoxFuture<'_, ()> {
            let _ = self.0.send(report);
            async {}.boxed()
        }
    }

    #[tokio::test]
    async fn test_binds_ephemeral_port() {
        let server = Server::new(config()).unwrap();
        assert_ne!(server.http_addr().port(), 0);
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_default_endpoints() {
        let server = Server::new(config()).unwrap();

        let warmup = server.dispatch(get(WARMUP_PATH), None).await;
        assert_eq!(warmup.status(), StatusCode::OK);
        assert_eq!(body(&warmup), "OK");
        assert!(warmup.headers().contains_key(REQUEST_ID_HEADER));

        let metrics = server.dispatch(get("/metrics"), None).await;
        assert_eq!(metrics.status(), StatusCode::OK);

        let pprof = server.dispatch(get("/debug/pprof/"), None).await;
        assert_eq!(pprof.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pprof_when_enabled() {
        let server = Server::new(ServerConfig {
            enable_pprof: true,
            ..config()
        })
        .unwrap();
        let response = server.dispatch(get("/debug/pprof/cmdline"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_service_routes_under_prefix() {
        let server = Server::new(config()).unwrap();
        let service = ServiceDef::new("widgets").prefix("/v1").route(Route::get(
            "/widgets/{id}",
            Endpoint::json_no_body(|ctx: RequestContext| async move {
                Ok::<_, ServiceError>(ctx.vars().get("id").unwrap_or_default().to_string())
            }),
        ));
        server.register(&service).unwrap();

        let response = server.dispatch(get("/v1/widgets/9"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response), "\"9\"");
    }

    #[tokio::test]
    async fn test_panic_recovered_and_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = Server::builder(config())
            .error_reporter(ChannelReporter(tx))
            .build()
            .unwrap();
        server
            .handle_fn(Method::GET, "/boom", |_ctx: RequestContext, _request: Request| async {
                if true {
                    panic!("kaboom");
                }
                Response::new(Bytes::new())
            })
            .unwrap();

        let response = server.dispatch(get("/boom"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(&response), PANIC_BODY);
        assert_eq!(server.monitor().count(), 0);

        let report = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.message, "kaboom");
        assert_eq!(report.path.as_deref(), Some("/boom"));
    }

    #[tokio::test]
    async fn test_write_timeout() {
        let server = Server::new(ServerConfig {
            write_timeout: Duration::from_millis(20),
            ..config()
        })
        .unwrap();
        server
            .handle_fn(Method::GET, "/slow", |_ctx: RequestContext, _request: Request| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Response::new(Bytes::new())
            })
            .unwrap();

        let response = server.dispatch(get("/slow"), None).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let server = Server::new(config()).unwrap();
        assert_eq!(server.stop().await, Err(ServerError::NotStarted));

        server.start().await.unwrap();
        assert_eq!(server.start().await, Err(ServerError::AlreadyStarted));
        assert!(matches!(
            server.register(&ServiceDef::new("late")),
            Err(ServerError::Registration(_))
        ));

        assert_eq!(server.stop().await, Ok(()));
        assert_eq!(server.stop().await, Err(ServerError::AlreadyStopped));
        assert_eq!(server.state(), ServerState::Stopped(Ok(())));
        assert_eq!(server.wait_stopped().await, Ok(()));
    }

    #[tokio::test]
    async fn test_draining_refuses_requests_but_serves_health() {
        let server = Server::new(config()).unwrap();
        server.start().await.unwrap();
        server.monitor().start_draining();

        let refused = server.dispatch(get(WARMUP_PATH), None).await;
        assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);

        let health = server.dispatch(get(server.health_check().path()), None).await;
        assert_eq!(health.status(), StatusCode::OK);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let server = Server::new(config()).unwrap();
        server.start().await.unwrap();

        let mut stream = TcpStream::connect(server.http_addr()).await.unwrap();
        stream
            .write_all(b"GET /_ah/warmup HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"), "{raw}");
        assert!(raw.ends_with("OK"), "{raw}");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_dispatch_and_listener() {
        let server = Server::new(config()).unwrap();
        let service = ServiceDef::new("echo").rpc(RpcService::new("echo.Echo").method(
            "Say",
            RpcMethod::unary(|_ctx: RequestContext, text: String| async move {
                Ok::<_, ServiceError>(text.to_uppercase())
            }),
        ));
        server.register(&service).unwrap();

        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/echo.Echo/Say")
            .header(header::CONTENT_TYPE, GRPC_CONTENT_TYPE)
            .body(encode_message(b"hi"))
            .unwrap();
        let reply = server.dispatch_rpc(request, None).await;
        assert_eq!(reply.status.code, RpcCode::Ok);
        assert_eq!(decode_message(reply.message.unwrap()).unwrap(), Bytes::from_static(b"HI"));

        server.start().await.unwrap();
        assert!(server.rpc_addr().is_some());
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_check_bounded_by_shutdown_timeout() {
        let server = Server::builder(ServerConfig {
            health_check_type: HealthCheckKind::Custom,
            shutdown_timeout: Duration::from_millis(300),
            ..config()
        })
        .health_check(CustomHealthCheck::new("/ready", |_ctx, _request| async {
            Response::new(Bytes::from_static(b"ready"))
        }))
        .build()
        .unwrap();
        server
            .handle_fn(Method::GET, "/stuck", |_ctx: RequestContext, _request: Request| async {
                std::future::pending::<()>().await;
                Response::new(Bytes::new())
            })
            .unwrap();
        server.start().await.unwrap();

        let stuck = tokio::spawn({
            let server = server.clone();
            async move { server.dispatch(get("/stuck"), None).await }
        });
        while server.monitor().count() == 0 {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_secs(3), server.stop())
            .await
            .expect("stop must honour the configured deadline");
        assert_eq!(
            outcome,
            Err(ServerError::ShutdownTimeout {
                timeout: Duration::from_millis(300),
                active: 1,
            })
        );
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        stuck.abort();
    }

    #[tokio::test]
    async fn test_fatal_accept_error_stops_server() {
        let server = Server::new(config()).unwrap();
        server.start().await.unwrap();

        accept_failed(&server.inner, &std::io::Error::other("listener gone"), Protocol::Http);

        let outcome = tokio::time::timeout(Duration::from_secs(3), server.wait_stopped())
            .await
            .unwrap();
        match &outcome {
            Err(ServerError::Accept(message)) => assert!(message.contains("listener gone")),
            other => panic!("expected an accept error, got {other:?}"),
        }
        assert_eq!(server.state(), ServerState::Stopped(outcome.clone()));
        assert_eq!(server.stop().await, outcome);
    }

    #[tokio::test]
    async fn test_custom_kind_requires_check() {
        let err = Server::new(ServerConfig {
            health_check_type: HealthCheckKind::Custom,
            ..config()
        })
        .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
