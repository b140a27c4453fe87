//! JSONP wrapping.
//!
//! With a non-empty `callback` query parameter the handler's body is
//! buffered and replaced, in a single write, by `/**/<callback>(<body>);`.

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderValue};

use gizmo_core::{query_param, Request, RequestContext, Response};

use crate::middleware::{BoxFuture, Middleware, Next};

const JAVASCRIPT: &str = "application/javascript; charset=utf-8";

/// Wraps responses for JSONP callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jsonp;

/// Wraps `body` in a JSONP call to `callback`.
pub fn wrap(callback: &str, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(body.len() + callback.len() + 8);
    out.put_slice(b"/**/");
    out.put_slice(callback.as_bytes());
    out.put_u8(b'(');
    out.put_slice(body);
    out.put_slice(b");");
    out.freeze()
}

impl Middleware for Jsonp {
    fn name(&self) -> &'static str {
        "jsonp"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let callback = query_param(request.uri(), "callback").filter(|c| !c.is_empty());
            let response = next.run(ctx, request).await;
            let Some(callback) = callback else {
                return response;
            };

            let (mut parts, body) = response.into_parts();
            let wrapped = wrap(&callback, &body);
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(JAVASCRIPT));
            http::Response::from_parts(parts, wrapped)
        })
    }
}
