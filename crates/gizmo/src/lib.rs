//! # Gizmo
//!
//! **Toolkit for HTTP and RPC services that shut down cleanly**
//!
//! Gizmo provides:
//!
//! - **Endpoints** - decode, business function, encode, with JSON, binary
//!   and passthrough codecs
//! - **Servers** - HTTP and RPC listeners, health checks that cooperate with
//!   load balancers, warm-up, profiler and metrics endpoints
//! - **Graceful shutdown** - in-flight requests are tracked and drained
//!   within a deadline
//! - **Pub/sub** - publisher and subscriber contracts with a batched-ack
//!   queue subscriber
//!
//! ## Quick Start
//!
//! ```no_run
//! use gizmo::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_dotenv().with_env()?.load()?;
//!     init_logging(&config.log_config())?;
//!
//!     gizmo::server::runtime(&config)?.block_on(async {
//!         let server = Server::new(config)?;
//!         server.register(&ServiceDef::new("greeter").route(Route::get(
//!             "/hello/{name}",
//!             Endpoint::json_no_body(|ctx: RequestContext| async move {
//!                 let name = ctx.vars().get("name").unwrap_or("world").to_string();
//!                 Ok::<_, ServiceError>(format!("hello {name}"))
//!             }),
//!         )))?;
//!         server.run().await
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! accept -> access log -> CORS -> route -> service middleware -> decode
//!        -> business middleware -> business -> encode -> X-Request-Id
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use gizmo_core as core;

// Re-export server types
pub use gizmo_server as server;

// Re-export middleware types
pub use gizmo_middleware as middleware;

// Re-export router types
pub use gizmo_router as router;

// Re-export telemetry types
pub use gizmo_telemetry as telemetry;

// Re-export configuration types
pub use gizmo_config as config;

// Re-export pub/sub types
pub use gizmo_pubsub as pubsub;

/// Prelude module for convenient imports.
///
/// ```
/// use gizmo::prelude::*;
///
/// let monitor = ActivityMonitor::new();
/// assert_eq!(monitor.count(), 0);
/// ```
pub mod prelude {
    pub use gizmo_core::{
        BusinessMiddleware, Endpoint, Reply, Request, RequestContext, Response, ResponseHooks,
        ServiceError, ServiceResult,
    };

    pub use gizmo_server::{
        ActivityMonitor, CustomHealthCheck, HealthCheck, LoadBalancerHealthCheck, Route,
        RpcMethod, RpcService, Server, ServerError, ServerResult, Service, ServiceDef,
        SimpleHealthCheck,
    };

    pub use gizmo_middleware::stages::{Cors, Jsonp, NoCache};
    pub use gizmo_middleware::{Middleware, Next, Pipeline};

    pub use gizmo_config::{ConfigLoader, HealthCheckKind, ServerConfig};

    pub use gizmo_telemetry::{init_logging, LogConfig};

    pub use gizmo_pubsub::{
        MultiPublisher, MultiPublisherExt, PubSubError, PubSubResult, Publisher, PublisherExt,
        Subscriber, SubscriberMessage,
    };
}
