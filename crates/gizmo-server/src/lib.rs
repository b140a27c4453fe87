//! # Gizmo Server
//!
//! Runtime for hosting Gizmo services:
//!
//! - [`Server`] - HTTP listener plus an optional RPC listener, default
//!   endpoints (health, warm-up, profiler, metrics) and graceful shutdown
//! - [`Service`] / [`ServiceDef`] - routes, middleware and RPC methods
//!   registered as one unit
//! - [`ActivityMonitor`] - in-flight request accounting for draining
//! - [`HealthCheck`] - simple, load balancer aware and custom readiness
//! - [`ServerRouter`] - pattern or exact route tables bound to handlers
//! - [`rpc`] - unary RPC hosting over HTTP/2
//!
//! ## Example
//!
//! ```no_run
//! use gizmo_config::ConfigLoader;
//! use gizmo_core::{Endpoint, ServiceError};
//! use gizmo_server::{Route, Server, ServiceDef};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_dotenv().with_env()?.load()?;
//!     let runtime = gizmo_server::runtime(&config)?;
//!
//!     runtime.block_on(async {
//!         let server = Server::new(config)?;
//!         server.register(&ServiceDef::new("hello").route(Route::get(
//!             "/hello",
//!             Endpoint::json_no_body(|_ctx| async { Ok::<_, ServiceError>("hello") }),
//!         )))?;
//!         server.run().await
//!     })?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod activity;
mod error;
pub mod health;
mod pprof;
mod router;
pub mod rpc;
mod server;
mod service;
mod shutdown;
pub mod tls;

pub use activity::{ActivityGuard, ActivityMonitor};
pub use error::{ServerError, ServerResult};
pub use health::{
    CustomHealthCheck, DrainSettings, HealthCheck, LoadBalancerHealthCheck, SimpleHealthCheck,
};
pub use pprof::PPROF_PREFIX;
pub use router::{handler_fn, vars, Handler, Lookup, RouterKind, ServerRouter};
pub use rpc::{RpcCode, RpcMethod, RpcReply, RpcService, RpcStatus, UnaryInterceptor};
pub use server::{
    Server, ServerBuilder, ServerState, PANIC_BODY, REQUEST_ID_HEADER, WARMUP_PATH,
};
pub use service::{Route, Service, ServiceDef};
pub use shutdown::{wait_for_os_signal, ConnectionToken, ConnectionTracker, ShutdownSignal};

use gizmo_config::ServerConfig;

/// Builds the multi-threaded runtime a server runs on, sized by
/// `GIZMO_GOMAXPROCS` when set.
pub fn runtime(config: &ServerConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .thread_name(format!("{}-worker", config.server_name));
    if let Some(threads) = config.worker_threads() {
        builder.worker_threads(threads);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_worker_threads() {
        let config = ServerConfig {
            gomaxprocs: 2,
            ..ServerConfig::default()
        };
        let runtime = runtime(&config).unwrap();
        assert_eq!(runtime.metrics().num_workers(), 2);
    }
}
