//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::time::Duration;

use gizmo::config::{HealthCheckKind, ServerConfig};
use gizmo::server::{DrainSettings, LoadBalancerHealthCheck, Server};

/// Ephemeral ports, fast polling and a short shutdown deadline.
pub fn config(kind: HealthCheckKind) -> ServerConfig {
    ServerConfig {
        server_name: "scenario".to_string(),
        http_addr: "127.0.0.1".to_string(),
        http_port: 0,
        rpc_port: 0,
        health_check_type: kind,
        shutdown_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    }
}

/// A started server behind a load balancer health check on `/status.txt`.
pub async fn lb_server(grace: Duration) -> Server {
    let config = config(HealthCheckKind::Lb);
    let check = LoadBalancerHealthCheck::new("/status.txt", &config.server_name)
        .with_grace(grace)
        .with_drain(DrainSettings::from_config(&config));
    let server = Server::builder(config).health_check(check).build().unwrap();
    server.start().await.unwrap();
    server
}

/// An unstarted server with the simple health check.
pub fn simple_server() -> Server {
    Server::new(config(HealthCheckKind::Simple)).unwrap()
}
