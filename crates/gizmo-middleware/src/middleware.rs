//! Core middleware trait and types.
//!
//! An HTTP middleware wraps the endpoint handler: it sees the request
//! context and request on the way in and the response on the way out, and
//! may answer on its own without calling the rest of the chain.
//!
//! # Example
//!
//! ```ignore
//! use gizmo_middleware::{BoxFuture, Middleware, Next};
//! use gizmo_core::{Request, RequestContext, Response};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let response = next.run(ctx, request).await;
//!             tracing::info!(parent: ctx.span(), elapsed = ?ctx.elapsed(), "done");
//!             response
//!         })
//!     }
//! }
//! ```

use gizmo_core::{Request, RequestContext, Response};

pub use futures_util::future::BoxFuture;

/// An HTTP middleware stage.
///
/// A stage calls `next.run()` at most once; not calling it short-circuits
/// the chain with the stage's own response.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Processes the request, usually by delegating to `next`.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// The rest of the chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

type Terminal<'a> =
    Box<dyn FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'a>;

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(Terminal<'a>),
}

impl<'a> Next<'a> {
    /// Puts `middleware` in front of `next`.
    pub fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// Ends the chain with a handler.
    pub fn handler<F>(f: F) -> Self
    where
        F: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(f)),
        }
    }

    /// Runs the next stage or the handler.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::FutureExt;
    use http::StatusCode;

    struct Tag(&'static str);

    #[derive(Default)]
    struct Visited(Vec<&'static str>);

    impl Middleware for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut RequestContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                let mut visited = ctx.get::<Visited>().map(|v| v.0.clone()).unwrap_or_default();
                visited.push(self.0);
                ctx.insert(Visited(visited));
                let mut response = next.run(ctx, request).await;
                response
                    .headers_mut()
                    .append("x-stage", http::HeaderValue::from_static(self.0));
                response
            })
        }
    }

    fn ok_handler<'a>() -> Next<'a> {
        Next::handler(|ctx: &mut RequestContext, _req: Request| {
            let visited = ctx.get::<Visited>().map(|v| v.0.join(",")).unwrap_or_default();
            async move { http::Response::new(Bytes::from(visited)) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_next_handler() {
        let mut ctx = RequestContext::background();
        let response = ok_handler().run(&mut ctx, Request::new(Bytes::new())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_chain_order() {
        let first = Tag("first");
        let second = Tag("second");
        let chain = Next::new(&first, Next::new(&second, ok_handler()));

        let mut ctx = RequestContext::background();
        let response = chain.run(&mut ctx, Request::new(Bytes::new())).await;

        assert_eq!(response.body(), &Bytes::from("first,second"));
        let stages: Vec<_> = response
            .headers()
            .get_all("x-stage")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(stages, vec!["second", "first"]);
    }
}
