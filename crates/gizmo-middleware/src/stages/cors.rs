//! CORS middleware.
//!
//! When the request carries an `Origin` and the origin ends with the
//! configured suffix (or no suffix is configured), the response echoes the
//! origin and allows credentials, the common headers and the usual methods.
//! `OPTIONS` requests are answered here with `200` and never reach the
//! handler.
//!
//! ```ignore
//! use gizmo_middleware::stages::Cors;
//!
//! let cors = Cors::with_origin_suffix(".example.com");
//! ```

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};

use gizmo_core::{Request, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

const ALLOW_HEADERS: &str = "Content-Type, x-requested-by, *";
const ALLOW_METHODS: &str = "GET, PUT, POST, DELETE, OPTIONS";

/// CORS middleware matching origins by suffix.
#[derive(Debug, Clone, Default)]
pub struct Cors {
    origin_suffix: Option<String>,
}

impl Cors {
    /// Allows every origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows origins ending with `suffix`.
    #[must_use]
    pub fn with_origin_suffix(suffix: impl Into<String>) -> Self {
        Self {
            origin_suffix: Some(suffix.into()).filter(|s| !s.is_empty()),
        }
    }

    /// Whether `origin` passes the suffix check.
    pub fn allows(&self, origin: &str) -> bool {
        !origin.is_empty()
            && self
                .origin_suffix
                .as_deref()
                .map_or(true, |suffix| origin.ends_with(suffix))
    }

    fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let Some(origin) = origin else {
            return;
        };
        if !origin.to_str().is_ok_and(|o| self.allows(o)) {
            return;
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

impl Middleware for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let origin = request.headers().get(header::ORIGIN).cloned();

            let mut response = if request.method() == Method::OPTIONS {
                let mut preflight = http::Response::new(Bytes::new());
                *preflight.status_mut() = StatusCode::OK;
                preflight
            } else {
                next.run(ctx, request).await
            };

            self.apply(origin.as_ref(), response.headers_mut());
            response
        })
    }
}
