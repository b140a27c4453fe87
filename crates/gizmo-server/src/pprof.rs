//! Runtime introspection endpoints under `/debug/pprof/`.

use http::{Method, StatusCode};
use serde_json::json;

use gizmo_core::codec::{text_response, JSON_CONTENT_TYPE};
use gizmo_core::{Request, RequestContext, Response};

use crate::error::ServerResult;
use crate::router::ServerRouter;

/// Path prefix of the profiler endpoints.
pub const PPROF_PREFIX: &str = "/debug/pprof";

const INDEX: &str = "\
/debug/pprof/cmdline  command line of the running process\n\
/debug/pprof/runtime  async runtime worker and task counts\n";

/// Mounts the profiler endpoints.
pub(crate) fn register(router: &mut ServerRouter) -> ServerResult<()> {
    router.handle_fn(Method::GET, "/debug/pprof/", |_ctx: RequestContext, _req: Request| async {
        text_response(StatusCode::OK, INDEX)
    })?;
    router.handle_fn(
        Method::GET,
        "/debug/pprof/cmdline",
        |_ctx: RequestContext, _req: Request| async { text_response(StatusCode::OK, cmdline()) },
    )?;
    router.handle_fn(
        Method::GET,
        "/debug/pprof/runtime",
        |_ctx: RequestContext, _req: Request| async { runtime_stats() },
    )
}

/// Arguments separated by NUL bytes.
fn cmdline() -> String {
    std::env::args().collect::<Vec<_>>().join("\0")
}

fn runtime_stats() -> Response {
    let body = match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let metrics = handle.metrics();
            json!({
                "workers": metrics.num_workers(),
                "alive_tasks": metrics.num_alive_tasks(),
            })
        }
        Err(_) => json!({ "workers": 0, "alive_tasks": 0 }),
    };

    let mut response = Response::new(body.to_string().into());
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    response
}
