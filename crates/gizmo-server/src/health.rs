//! Readiness probes and shutdown drain coordination.
//!
//! Three variants implement [`HealthCheck`]:
//!
//! | Variant | Ready | Draining | Stop waits for |
//! |---|---|---|---|
//! | [`SimpleHealthCheck`] | `200 ok-<name>` | `200 ok-<name>` | idle monitor |
//! | [`LoadBalancerHealthCheck`] | `200 ok-<name>` | `503 service unavailable` | idle monitor and every caller released |
//! | [`CustomHealthCheck`] | application handler | application handler | idle monitor |
//!
//! Every `stop` is bounded by the shutdown timeout and reports
//! [`ServerError::ShutdownTimeout`] when the deadline passes first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;

use gizmo_config::{HealthCheckKind, ServerConfig};
use gizmo_core::codec::text_response;
use gizmo_core::query::has_query_param;
use gizmo_core::{Request, RequestContext, Response};

use crate::activity::ActivityMonitor;
use crate::error::{ServerError, ServerResult};
use crate::router::{handler_fn, Handler};

/// Body of a not-ready probe response.
pub const NOT_READY_BODY: &str = "service unavailable\n";

/// Query parameter marking operator probes, which are left out of caller
/// bookkeeping.
pub const DEPLOYER_PARAM: &str = "deployer";

/// Readiness reporting and drain participation.
pub trait HealthCheck: Send + Sync + 'static {
    /// Path the probe is served on.
    fn path(&self) -> &str;

    /// Marks the check ready and hands it the server's monitor.
    fn start(&self, monitor: ActivityMonitor);

    /// Answers one probe.
    fn serve(&self, ctx: RequestContext, request: Request) -> BoxFuture<'_, Response>;

    /// Turns not-ready and waits until the server may close its listeners.
    fn stop(&self) -> BoxFuture<'_, ServerResult<()>>;

    /// Whether the check currently reports ready.
    fn is_ready(&self) -> bool;
}

/// Shutdown timing shared by every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    /// Hard deadline for `stop`.
    pub shutdown_timeout: Duration,
    /// How often drain state is re-checked.
    pub poll_interval: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl DrainSettings {
    /// Reads `GIZMO_SHUTDOWN_TIMEOUT` and `GIZMO_POLL_INTERVAL`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            shutdown_timeout: config.shutdown_timeout,
            poll_interval: config.poll_interval,
        }
    }
}

/// Builds the configured variant. `custom` has to be supplied by the
/// application, so it is rejected here.
pub fn from_config(config: &ServerConfig) -> ServerResult<Arc<dyn HealthCheck>> {
    let path = config.health_check_path();
    let drain = DrainSettings::from_config(config);
    match config.health_check_type {
        HealthCheckKind::Simple => Ok(Arc::new(
            SimpleHealthCheck::new(path, &config.server_name).with_drain(drain),
        )),
        HealthCheckKind::Lb => Ok(Arc::new(
            LoadBalancerHealthCheck::new(path, &config.server_name)
                .with_grace(config.lb_grace_duration)
                .with_drain(drain),
        )),
        HealthCheckKind::Custom => Err(ServerError::Config(
            "health check type 'custom' needs a handler from the application".to_string(),
        )),
    }
}

/// Polls until the monitor is idle and `released` holds, or the deadline
/// passes.
async fn drain(
    monitor: Option<ActivityMonitor>,
    settings: DrainSettings,
    released: impl Fn() -> bool + Send + Sync,
) -> ServerResult<()> {
    let poll_interval = settings.poll_interval.max(Duration::from_millis(1));
    let poll = async {
        loop {
            let active = monitor.as_ref().map_or(0, ActivityMonitor::count);
            if active == 0 && released() {
                return;
            }
            tracing::debug!(active, "waiting for requests to drain");
            tokio::time::sleep(poll_interval).await;
        }
    };

    match tokio::time::timeout(settings.shutdown_timeout, poll).await {
        Ok(()) => Ok(()),
        Err(_) => {
            let active = monitor.as_ref().map_or(0, ActivityMonitor::count);
            tracing::warn!(
                active,
                timeout = ?settings.shutdown_timeout,
                "shutdown deadline passed before drain finished"
            );
            Err(ServerError::ShutdownTimeout {
                timeout: settings.shutdown_timeout,
                active,
            })
        }
    }
}

fn ok_body(server_name: &str) -> Response {
    text_response(StatusCode::OK, format!("ok-{server_name}"))
}

/// Always reports ok, before and after `stop`.
#[derive(Debug)]
pub struct SimpleHealthCheck {
    path: String,
    server_name: String,
    drain: DrainSettings,
    monitor: Mutex<Option<ActivityMonitor>>,
    started: AtomicBool,
}

impl SimpleHealthCheck {
    /// Serves `ok-<server_name>` on `path`.
    pub fn new(path: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            server_name: server_name.into(),
            drain: DrainSettings::default(),
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Overrides the drain timing.
    #[must_use]
    pub fn with_drain(mut self, drain: DrainSettings) -> Self {
        self.drain = drain;
        self
    }
}

impl HealthCheck for SimpleHealthCheck {
    fn path(&self) -> &str {
        &self.path
    }

    fn start(&self, monitor: ActivityMonitor) {
        *self.monitor.lock() = Some(monitor);
        self.started.store(true, Ordering::SeqCst);
    }

    fn serve(&self, _ctx: RequestContext, _request: Request) -> BoxFuture<'_, Response> {
        async move { ok_body(&self.server_name) }.boxed()
    }

    fn stop(&self) -> BoxFuture<'_, ServerResult<()>> {
        let monitor = self.monitor.lock().clone();
        drain(monitor, self.drain, || true).boxed()
    }

    fn is_ready(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Coordinates shutdown with external load balancers.
///
/// Each probing caller is remembered by IP. Once draining, the first 503
/// served to a caller is timestamped; the caller is released when that
/// timestamp is older than the grace duration. `stop` finishes when every
/// remembered caller is released and no request is in flight.
///
/// A check that was never probed has no callers and releases immediately.
#[derive(Debug)]
pub struct LoadBalancerHealthCheck {
    path: String,
    server_name: String,
    grace: Duration,
    drain: DrainSettings,
    ready: AtomicBool,
    monitor: Mutex<Option<ActivityMonitor>>,
    not_ready_since: Mutex<HashMap<String, Option<Instant>>>,
}

impl LoadBalancerHealthCheck {
    /// Serves `ok-<server_name>` on `path` while ready.
    pub fn new(path: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            server_name: server_name.into(),
            grace: Duration::from_secs(15),
            drain: DrainSettings::default(),
            ready: AtomicBool::new(false),
            monitor: Mutex::new(None),
            not_ready_since: Mutex::new(HashMap::new()),
        }
    }

    /// Sets how long a caller must have seen not-ready before release.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Overrides the drain timing.
    #[must_use]
    pub fn with_drain(mut self, drain: DrainSettings) -> Self {
        self.drain = drain;
        self
    }

    /// Number of callers being tracked.
    pub fn callers(&self) -> usize {
        self.not_ready_since.lock().len()
    }

    fn observe(&self, caller: &str, ready: bool) {
        let mut callers = self.not_ready_since.lock();
        let since = callers.entry(caller.to_string()).or_insert(None);
        if !ready && since.is_none() {
            tracing::debug!(caller, "caller observed not-ready");
            *since = Some(Instant::now());
        }
    }

    fn released(&self) -> bool {
        let grace = self.grace;
        self.not_ready_since
            .lock()
            .values()
            .all(|since| since.is_some_and(|t| t.elapsed() >= grace))
    }
}

impl HealthCheck for LoadBalancerHealthCheck {
    fn path(&self) -> &str {
        &self.path
    }

    fn start(&self, monitor: ActivityMonitor) {
        *self.monitor.lock() = Some(monitor);
        self.ready.store(true, Ordering::SeqCst);
    }

    fn serve(&self, ctx: RequestContext, request: Request) -> BoxFuture<'_, Response> {
        async move {
            let ready = self.is_ready();
            if !has_query_param(request.uri(), DEPLOYER_PARAM) {
                self.observe(ctx.caller_ip().unwrap_or("unknown"), ready);
            }
            if ready {
                ok_body(&self.server_name)
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, NOT_READY_BODY)
            }
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'_, ServerResult<()>> {
        self.ready.store(false, Ordering::SeqCst);
        let monitor = self.monitor.lock().clone();
        tracing::info!(
            callers = self.callers(),
            grace = ?self.grace,
            "health check draining"
        );
        drain(monitor, self.drain, || self.released()).boxed()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Delegates probes to an application handler.
pub struct CustomHealthCheck {
    path: String,
    handler: Handler,
    drain: DrainSettings,
    ready: AtomicBool,
    monitor: Mutex<Option<ActivityMonitor>>,
}

impl std::fmt::Debug for CustomHealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomHealthCheck")
            .field("path", &self.path)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl CustomHealthCheck {
    /// Serves `handler` on `path`.
    pub fn new<F, Fut>(path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self {
            path: path.into(),
            handler: handler_fn(handler),
            drain: DrainSettings::default(),
            ready: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    /// Overrides the drain timing.
    #[must_use]
    pub fn with_drain(mut self, drain: DrainSettings) -> Self {
        self.drain = drain;
        self
    }
}

impl HealthCheck for CustomHealthCheck {
    fn path(&self) -> &str {
        &self.path
    }

    fn start(&self, monitor: ActivityMonitor) {
        *self.monitor.lock() = Some(monitor);
        self.ready.store(true, Ordering::SeqCst);
    }

    fn serve(&self, ctx: RequestContext, request: Request) -> BoxFuture<'_, Response> {
        (self.handler)(ctx, request)
    }

    fn stop(&self) -> BoxFuture<'_, ServerResult<()>> {
        self.ready.store(false, Ordering::SeqCst);
        let monitor = self.monitor.lock().clone();
        drain(monitor, self.drain, || true).boxed()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn probe(uri: &str, ip: &str) -> (RequestContext, Request) {
        let request = http::Request::builder()
            .uri(uri)
            .body(Bytes::new())
            .unwrap();
        let remote = format!("{ip}:40000").parse().unwrap();
        let ctx = RequestContext::from_request(&request, Some(remote));
        (ctx, request)
    }

    fn drain_settings(timeout_secs: u64) -> DrainSettings {
        DrainSettings {
            shutdown_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(100),
        }
    }

    async fn serve(check: &dyn HealthCheck, uri: &str, ip: &str) -> Response {
        let (ctx, request) = probe(uri, ip);
        check.serve(ctx, request).await
    }

    #[tokio::test]
    async fn test_lb_ready_body() {
        let check = LoadBalancerHealthCheck::new("/status.txt", "api-7");
        check.start(ActivityMonitor::new());

        let response = serve(&check, "/status.txt", "1.1.1.1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from_static(b"ok-api-7"));
        assert_eq!(check.callers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lb_draining_returns_503() {
        let check = LoadBalancerHealthCheck::new("/status.txt", "api")
            .with_grace(Duration::from_secs(1))
            .with_drain(drain_settings(30));
        check.start(ActivityMonitor::new());
        serve(&check, "/status.txt", "1.1.1.1").await;

        // Not-ready is set when stop is called, before the drain is polled.
        let stop = check.stop();
        assert!(!check.is_ready());

        let response = serve(&check, "/status.txt", "1.1.1.1").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body(), &Bytes::from_static(NOT_READY_BODY.as_bytes()));

        let started = Instant::now();
        stop.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lb_waits_for_unreleased_caller() {
        let check = LoadBalancerHealthCheck::new("/status.txt", "api")
            .with_grace(Duration::from_secs(1))
            .with_drain(drain_settings(5));
        check.start(ActivityMonitor::new());
        serve(&check, "/status.txt", "2.2.2.2").await;

        // The caller never comes back to see the 503.
        let started = Instant::now();
        let err = check.stop().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deployer_probe_not_tracked() {
        let check = LoadBalancerHealthCheck::new("/status.txt", "api")
            .with_drain(drain_settings(5));
        check.start(ActivityMonitor::new());
        serve(&check, "/status.txt?deployer=ci", "3.3.3.3").await;
        assert_eq!(check.callers(), 0);

        check.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_monitor() {
        let monitor = ActivityMonitor::new();
        let check = SimpleHealthCheck::new("/healthz", "api").with_drain(drain_settings(10));
        check.start(monitor.clone());

        let guard = monitor.try_enter().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(guard);
        });

        let started = Instant::now();
        check.stop().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_simple_stays_ok_after_stop() {
        let check = SimpleHealthCheck::new("/healthz", "api");
        check.start(ActivityMonitor::new());
        check.stop().await.unwrap();

        let response = serve(&check, "/healthz", "4.4.4.4").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(check.is_ready());
    }

    #[tokio::test]
    async fn test_custom_delegates() {
        let check =
            CustomHealthCheck::new("/ready", |_ctx: RequestContext, _request: Request| async {
                text_response(StatusCode::ACCEPTED, "custom")
            });
        assert!(!check.is_ready());
        check.start(ActivityMonitor::new());
        assert!(check.is_ready());

        let response = serve(&check, "/ready", "5.5.5.5").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        check.stop().await.unwrap();
        assert!(!check.is_ready());
    }

    #[test]
    fn test_from_config() {
        let config = ServerConfig::default();
        let check = from_config(&config).unwrap();
        assert_eq!(check.path(), "/status.txt");

        let config = ServerConfig {
            health_check_type: HealthCheckKind::Custom,
            ..ServerConfig::default()
        };
        assert!(from_config(&config).is_err());
    }
}
