//! Services: a named bundle of routes, middleware and optional RPC methods.
//!
//! A [`Service`] is registered on the server before start. Its HTTP routes
//! are mounted under [`Service::prefix`], run behind [`Service::middleware`],
//! and every endpoint's business function is wrapped by
//! [`Service::business_middleware`]. The same business middleware wraps the
//! RPC methods of [`Service::rpc`].
//!
//! [`ServiceDef`] implements the trait from builder calls for services that
//! do not need their own type.

use std::fmt;

use http::Method;

use gizmo_core::{BusinessMiddleware, Endpoint};
use gizmo_middleware::{Middleware, Pipeline};
use gizmo_router::MethodFilter;

use crate::rpc::RpcService;

/// One HTTP route of a service.
#[derive(Clone)]
pub struct Route {
    /// Matched method, or any.
    pub method: MethodFilter,
    /// Path template relative to the service prefix.
    pub path: String,
    /// Handler.
    pub endpoint: Endpoint,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Creates a route.
    pub fn new(
        method: impl Into<MethodFilter>,
        path: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            endpoint,
        }
    }

    /// A `GET` route.
    pub fn get(path: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(Method::GET, path, endpoint)
    }

    /// A `POST` route.
    pub fn post(path: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(Method::POST, path, endpoint)
    }

    /// A `PUT` route.
    pub fn put(path: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(Method::PUT, path, endpoint)
    }

    /// A `DELETE` route.
    pub fn delete(path: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(Method::DELETE, path, endpoint)
    }
}

/// Something the server can host.
pub trait Service: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Path prefix for every route, empty by default.
    fn prefix(&self) -> &str {
        ""
    }

    /// HTTP middleware run around every route of this service.
    fn middleware(&self) -> Pipeline {
        Pipeline::default()
    }

    /// Wrappers applied to every business function, outermost first.
    fn business_middleware(&self) -> Vec<BusinessMiddleware> {
        Vec::new()
    }

    /// HTTP routes.
    fn routes(&self) -> Vec<Route>;

    /// RPC methods, if the service serves any.
    fn rpc(&self) -> Option<RpcService> {
        None
    }
}

/// Joins a service prefix and a route path.
pub(crate) fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match (prefix.is_empty(), path.starts_with('/')) {
        (true, _) => path.to_string(),
        (false, true) => format!("{prefix}{path}"),
        (false, false) => format!("{prefix}/{path}"),
    }
}

/// A [`Service`] assembled from builder calls.
///
/// ```
/// use gizmo_core::{Endpoint, ServiceError};
/// use gizmo_server::{Route, Service, ServiceDef};
///
/// let service = ServiceDef::new("widgets")
///     .prefix("/v1")
///     .route(Route::get(
///         "/widgets",
///         Endpoint::json_no_body(|_ctx| async { Ok::<_, ServiceError>(vec!["gear"]) }),
///     ));
///
/// assert_eq!(service.name(), "widgets");
/// assert_eq!(service.routes().len(), 1);
/// ```
#[derive(Default)]
pub struct ServiceDef {
    name: String,
    prefix: String,
    middleware: Pipeline,
    business_middleware: Vec<BusinessMiddleware>,
    routes: Vec<Route>,
    rpc: Option<RpcService>,
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("middleware", &self.middleware.stage_names())
            .field("routes", &self.routes)
            .field("rpc", &self.rpc)
            .finish_non_exhaustive()
    }
}

impl ServiceDef {
    /// Creates an empty service.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the path prefix.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Appends an HTTP middleware stage.
    #[must_use]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware = Pipeline::builder()
            .extend(&self.middleware)
            .stage(middleware)
            .build();
        self
    }

    /// Appends a business middleware.
    #[must_use]
    pub fn business_middleware(mut self, middleware: BusinessMiddleware) -> Self {
        self.business_middleware.push(middleware);
        self
    }

    /// Adds a route.
    #[must_use]
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Sets the RPC methods.
    #[must_use]
    pub fn rpc(mut self, rpc: RpcService) -> Self {
        self.rpc = Some(rpc);
        self
    }
}

impl Service for ServiceDef {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn middleware(&self) -> Pipeline {
        self.middleware.clone()
    }

    fn business_middleware(&self) -> Vec<BusinessMiddleware> {
        self.business_middleware.clone()
    }

    fn routes(&self) -> Vec<Route> {
        self.routes.clone()
    }

    fn rpc(&self) -> Option<RpcService> {
        self.rpc.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gizmo_core::ServiceError;
    use gizmo_middleware::stages::NoCache;

    fn endpoint() -> Endpoint {
        Endpoint::json_no_body(|_ctx| async { Ok::<_, ServiceError>("ok") })
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "/a"), "/a");
        assert_eq!(join_path("/v1", "/a"), "/v1/a");
        assert_eq!(join_path("/v1/", "/a"), "/v1/a");
        assert_eq!(join_path("/v1", "a"), "/v1/a");
    }

    #[test]
    fn test_route_helpers() {
        assert_eq!(Route::get("/a", endpoint()).method, MethodFilter::from(Method::GET));
        assert_eq!(Route::delete("/a", endpoint()).method, MethodFilter::from(Method::DELETE));
    }

    #[test]
    fn test_service_def() {
        let service = ServiceDef::new("widgets")
            .prefix("/v1")
            .middleware(NoCache)
            .route(Route::get("/widgets", endpoint()))
            .route(Route::post("/widgets", endpoint()))
            .rpc(RpcService::new("widgets.Widgets"));

        assert_eq!(Service::prefix(&service), "/v1");
        assert_eq!(Service::middleware(&service).stage_names(), vec!["no_cache"]);
        assert_eq!(Service::routes(&service).len(), 2);
        assert_eq!(Service::rpc(&service).map(|r| r.name().to_string()).as_deref(), Some("widgets.Widgets"));
        assert!(Service::business_middleware(&service).is_empty());
    }
}
