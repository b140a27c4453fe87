//! Disables client and proxy caching of responses.

use http::{header, HeaderValue};

use gizmo_core::{Request, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// Adds `Cache-Control`, `Pragma` and `Expires` headers forbidding caching.
/// Headers the handler already set are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl Middleware for NoCache {
    fn name(&self) -> &'static str {
        "no_cache"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut response = next.run(ctx, request).await;
            let headers = response.headers_mut();
            headers
                .entry(header::CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache, no-store, must-revalidate"));
            headers
                .entry(header::PRAGMA)
                .or_insert(HeaderValue::from_static("no-cache"));
            headers
                .entry(header::EXPIRES)
                .or_insert(HeaderValue::from_static("0"));
            response
        })
    }
}
