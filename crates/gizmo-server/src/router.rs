//! Route tables bound to request handlers.
//!
//! [`ServerRouter`] wraps one of the two tables from `gizmo-router` and
//! stores a [`Handler`] per route. Dispatch sets the extracted route
//! variables on the [`RequestContext`] before the handler runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{Method, StatusCode};

use gizmo_core::codec::error_response;
use gizmo_core::{Request, RequestContext, Response, RouteVars, ServiceError};
use gizmo_router::{ExactRouter, MethodFilter, PatternRouter};

use crate::error::{ServerError, ServerResult};

/// A type-erased request handler.
pub type Handler =
    Arc<dyn Fn(RequestContext, Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wraps an async function as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: RequestContext, request: Request| f(ctx, request).boxed())
}

/// Which route table the server dispatches through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouterKind {
    /// `{name}` and `{name:pattern}` segments, overridable not-found.
    #[default]
    Pattern,
    /// Exact paths with the `ANY` method sentinel, fixed not-found.
    Exact,
}

enum Table {
    Pattern(PatternRouter<Handler>),
    Exact(ExactRouter<Handler>),
}

/// Outcome of a route lookup.
pub enum Lookup {
    /// A handler matched both method and path.
    Found(Handler, RouteVars),
    /// The path exists under other methods.
    MethodNotAllowed,
    /// Nothing matched.
    NotFound,
}

/// A route table of handlers.
pub struct ServerRouter {
    table: Table,
    not_found: Handler,
}

impl std::fmt::Debug for ServerRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRouter")
            .field("kind", &self.kind())
            .field("routes", &self.len())
            .finish()
    }
}

impl Default for ServerRouter {
    fn default() -> Self {
        Self::new(RouterKind::default())
    }
}

impl ServerRouter {
    /// Creates an empty router of the given kind.
    #[must_use]
    pub fn new(kind: RouterKind) -> Self {
        let table = match kind {
            RouterKind::Pattern => Table::Pattern(PatternRouter::new()),
            RouterKind::Exact => Table::Exact(ExactRouter::new()),
        };
        Self {
            table,
            not_found: Arc::new(|_ctx: RequestContext, _request: Request| {
                async { error_response(&ServiceError::not_found("not found")) }.boxed()
            }),
        }
    }

    /// The table kind.
    pub fn kind(&self) -> RouterKind {
        match self.table {
            Table::Pattern(_) => RouterKind::Pattern,
            Table::Exact(_) => RouterKind::Exact,
        }
    }

    /// Registers `handler` for `method` and `path`.
    pub fn handle(
        &mut self,
        method: impl Into<MethodFilter>,
        path: &str,
        handler: Handler,
    ) -> ServerResult<()> {
        let result = match &mut self.table {
            Table::Pattern(router) => router.insert(method, path, handler),
            Table::Exact(router) => router.insert(method, path, handler),
        };
        result.map_err(|e| ServerError::registration(e.to_string()))
    }

    /// Registers an async function for `method` and `path`.
    pub fn handle_fn<F, Fut>(
        &mut self,
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

    /// Replaces the not-found handler. Only the pattern table allows it.
    pub fn set_not_found(&mut self, handler: Handler) -> ServerResult<()> {
        match self.table {
            Table::Pattern(_) => {
                self.not_found = handler;
                Ok(())
            }
            Table::Exact(_) => Err(ServerError::registration(
                "the exact router's not-found handler cannot be replaced",
            )),
        }
    }

    /// Whether any route serves `path`.
    pub fn has_path(&self, path: &str) -> bool {
        match &self.table {
            Table::Pattern(router) => router.has_path(path),
            Table::Exact(router) => router.has_path(path),
        }
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        match &self.table {
            Table::Pattern(router) => router.len(),
            Table::Exact(router) => router.len(),
        }
    }

    /// Whether no route is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the handler for a request line.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let matched = match &self.table {
            Table::Pattern(router) => router.match_route(method, path),
            Table::Exact(router) => router.match_route(method, path),
        };
        match matched {
            Some(m) => Lookup::Found(Arc::clone(m.value), m.vars),
            None if self.has_path(path) => Lookup::MethodNotAllowed,
            None => Lookup::NotFound,
        }
    }

    /// The handler a request line goes to, falling back to the 405 and
    /// not-found handlers.
    pub fn resolve(&self, method: &Method, path: &str) -> (Handler, RouteVars) {
        match self.lookup(method, path) {
            Lookup::Found(handler, vars) => (handler, vars),
            Lookup::MethodNotAllowed => (handler_fn(method_not_allowed), RouteVars::new()),
            Lookup::NotFound => (Arc::clone(&self.not_found), RouteVars::new()),
        }
    }

    /// Routes and runs one request.
    pub async fn serve(&self, mut ctx: RequestContext, request: Request) -> Response {
        let (handler, vars) = self.resolve(request.method(), request.uri().path());
        ctx.set_vars(vars);
        handler(ctx, request).await
    }
}

async fn method_not_allowed(_ctx: RequestContext, _request: Request) -> Response {
    error_response(&ServiceError::status(
        StatusCode::METHOD_NOT_ALLOWED,
        "method not allowed",
    ))
}

/// Route variables of the current request as a map; empty when none.
pub fn vars(ctx: &RequestContext) -> HashMap<String, String> {
    ctx.vars().to_map()
}

/// A 200 plain-text response.
pub(crate) fn ok_text(body: &'static str) -> Response {
    gizmo_core::codec::text_response(StatusCode::OK, Bytes::from_static(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gizmo_router::ANY;

    fn request(method: Method, path: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    fn echo_var(name: &'static str) -> Handler {
        handler_fn(move |ctx: RequestContext, _request: Request| async move {
            let value = ctx.vars().get(name).unwrap_or("-").to_string();
            Response::new(Bytes::from(value))
        })
    }

    #[tokio::test]
    async fn test_pattern_sets_vars() {
        let mut router = ServerRouter::new(RouterKind::Pattern);
        router
            .handle(Method::GET, "/widgets/{id:[0-9]+}", echo_var("id"))
            .unwrap();

        let response = router
            .serve(RequestContext::background(), request(Method::GET, "/widgets/42"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from_static(b"42"));
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let mut router = ServerRouter::default();
        router.handle(Method::GET, "/widgets", echo_var("x")).unwrap();

        let response = router
            .serve(RequestContext::background(), request(Method::POST, "/widgets"))
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_not_found_override() {
        let mut router = ServerRouter::new(RouterKind::Pattern);
        router
            .set_not_found(handler_fn(|_ctx: RequestContext, _request: Request| async {
                let mut response = Response::new(Bytes::from_static(b"nope"));
                *response.status_mut() = StatusCode::GONE;
                response
            }))
            .unwrap();

        let response = router
            .serve(RequestContext::background(), request(Method::GET, "/missing"))
            .await;
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_exact_router_any_and_fixed_not_found() {
        let mut router = ServerRouter::new(RouterKind::Exact);
        router.handle(ANY, "/ping", echo_var("none")).unwrap();
        assert!(router.set_not_found(echo_var("x")).is_err());

        let response = router
            .serve(RequestContext::background(), request(Method::DELETE, "/ping"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .serve(RequestContext::background(), request(Method::GET, "/ping/extra"))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut router = ServerRouter::default();
        let err = router.handle(Method::GET, "no-slash", echo_var("x")).unwrap_err();
        assert!(matches!(err, ServerError::Registration(_)));
    }

    #[test]
    fn test_vars_helper_empty() {
        assert!(vars(&RequestContext::background()).is_empty());
    }
}
