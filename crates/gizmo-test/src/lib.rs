//! # Gizmo Test
//!
//! In-memory requests against a [`gizmo_server::Server`]: no sockets, same
//! middleware, routing and activity accounting as the listener.
//!
//! ## Example
//!
//! ```no_run
//! use gizmo_config::ServerConfig;
//! use gizmo_core::{Endpoint, ServiceError};
//! use gizmo_server::{Route, Server, ServiceDef};
//! use gizmo_test::TestClient;
//!
//! # async fn run() {
//! let server = Server::new(ServerConfig::default()).unwrap();
//! server
//!     .register(&ServiceDef::new("hello").route(Route::get(
//!         "/hello",
//!         Endpoint::json_no_body(|_ctx| async { Ok::<_, ServiceError>("hi") }),
//!     )))
//!     .unwrap();
//!
//! let client = TestClient::new(server);
//! client
//!     .get("/hello")
//!     .send()
//!     .await
//!     .assert_status_code(200)
//!     .assert_json_eq(&serde_json::json!("hi"));
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/gizmo-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod response;

pub use client::{TestClient, TestClientRequest, DEFAULT_REMOTE};
pub use error::TestError;
pub use response::TestResponse;
