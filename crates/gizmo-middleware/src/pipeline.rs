//! Ordered middleware pipeline.
//!
//! Stages run in the order they were added: the first stage sees the
//! request first and the response last.

use std::sync::Arc;

use gizmo_core::{Request, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable, ordered list of middleware stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs `handler` behind every stage.
    pub async fn process<H>(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(&mut RequestContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next.run(ctx, request).await
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared stage.
    #[must_use]
    pub fn shared(mut self, middleware: BoxedMiddleware) -> Self {
        self.stages.push(middleware);
        self
    }

    /// Appends every stage of another pipeline.
    #[must_use]
    pub fn extend(mut self, other: &Pipeline) -> Self {
        self.stages.extend(other.stages.iter().cloned());
        self
    }

    /// Builds the pipeline.
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::FutureExt;
    use http::{HeaderValue, StatusCode};

    struct Append(&'static str);

    impl Middleware for Append {
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
                let mut response = next.run(ctx, request).await;
                response
                    .headers_mut()
                    .append("x-order", HeaderValue::from_static(self.0));
                response
            })
        }
    }

    struct Refuse;

    impl Middleware for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        fn process<'a>(
            &'a self,
            _ctx: &'a mut RequestContext,
            _request: Request,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                let mut response = http::Response::new(Bytes::new());
                *response.status_mut() = StatusCode::FORBIDDEN;
                response
            })
        }
    }

    fn handler(_ctx: &mut RequestContext, _request: Request) -> BoxFuture<'static, Response> {
        async { http::Response::new(Bytes::from_static(b"handled")) }.boxed()
    }

    #[tokio::test]
    async fn test_pipeline_executes_in_order() {
        let pipeline = Pipeline::builder()
            .stage(Append("outer"))
            .stage(Append("inner"))
            .build();
        assert_eq!(pipeline.stage_names(), vec!["outer", "inner"]);

        let mut ctx = RequestContext::background();
        let response = pipeline
            .process(&mut ctx, Request::new(Bytes::new()), handler)
            .await;

        let order: Vec<_> = response.headers().get_all("x-order").iter().collect();
        assert_eq!(order, vec!["inner", "outer"]);
        assert_eq!(response.body(), &Bytes::from_static(b"handled"));
    }

    #[tokio::test]
    async fn test_short_circuit() {
        let pipeline = Pipeline::builder()
            .stage(Append("outer"))
            .stage(Refuse)
            .build();

        let mut ctx = RequestContext::background();
        let response = pipeline
            .process(&mut ctx, Request::new(Bytes::new()), handler)
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.body().is_empty());
        assert_eq!(response.headers()["x-order"], "outer");
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::default();
        assert!(pipeline.is_empty());

        let mut ctx = RequestContext::background();
        let response = pipeline
            .process(&mut ctx, Request::new(Bytes::new()), handler)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_extend() {
        let base = Pipeline::builder().stage(Append("a")).build();
        let pipeline = Pipeline::builder().extend(&base).stage(Append("b")).build();
        assert_eq!(pipeline.len(), 2);
    }
}
