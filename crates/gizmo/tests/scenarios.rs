//! End-to-end behaviour of health checks, shutdown and pub/sub.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::json;

use gizmo::core::{Endpoint, RequestContext, ServiceError};
use gizmo::pubsub::testing::TestSubscriber;
use gizmo::pubsub::{
    HttpPublisher, MemoryQueue, MessageAttributes, PublishBatch, PublishRecord, Publisher,
    PublisherExt, QueueSubscriber, QueueSubscriberConfig, Subscriber, SubscriberMessage,
};
use gizmo::server::health::NOT_READY_BODY;
use gizmo::server::{Route, ServerError, ServiceDef};
use gizmo_test::TestClient;

fn caller(ip: &str) -> SocketAddr {
    format!("{ip}:34567").parse().unwrap()
}

#[tokio::test]
async fn scenario_a_health_ready() {
    let server = common::lb_server(Duration::from_millis(50)).await;
    let client = TestClient::new(server.clone());

    let response = client.get("/status.txt").send().await;
    response.assert_status_code(200);
    let body = response.text().unwrap();
    assert!(body.starts_with("ok-") && body.len() > 3, "unexpected body {body:?}");

    // Release the probing caller so the drain completes.
    let stopping = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.get("/status.txt").send().await.assert_status_code(503);
    stopping.await.unwrap().unwrap();
}

#[tokio::test]
async fn scenario_b_health_draining() {
    let server = common::lb_server(Duration::from_millis(100)).await;
    let client = TestClient::new(server.clone());
    client.get("/status.txt").send().await.assert_status_code(200);

    let stopping = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    while server.health_check().is_ready() {
        tokio::task::yield_now().await;
    }

    let response = client.get("/status.txt").send().await;
    response.assert_status_code(503).assert_body_eq(NOT_READY_BODY);
    assert_eq!(response.text().unwrap(), "service unavailable\n");

    stopping.await.unwrap().unwrap();
}

#[tokio::test]
async fn scenario_c_load_balancer_drain_release() {
    let grace = Duration::from_secs(1);
    let server = common::lb_server(grace).await;
    let client = TestClient::new(server.clone()).with_remote(caller("1.1.1.1"));

    client.get("/status.txt").send().await.assert_status_code(200);

    let started = Instant::now();
    let stopping = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    while server.health_check().is_ready() {
        tokio::task::yield_now().await;
    }

    let probed = Instant::now();
    client.get("/status.txt").send().await.assert_status_code(503);

    let outcome = stopping.await.unwrap();
    assert_eq!(outcome, Ok(()));
    assert!(
        probed.elapsed() >= grace,
        "stop returned {:?} after the caller saw 503",
        probed.elapsed()
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn scenario_d_active_request_timeout() {
    let server = common::simple_server();
    let (cancelled_tx, cancelled_rx) = tokio::sync::oneshot::channel();
    let cancelled_tx = Arc::new(Mutex::new(Some(cancelled_tx)));
    server
        .register(&ServiceDef::new("stuck").route(Route::get(
            "/stuck",
            Endpoint::json_no_body(move |ctx: RequestContext| {
                let cancelled_tx = Arc::clone(&cancelled_tx);
                async move {
                    ctx.cancellation().cancelled().await;
                    if let Some(tx) = cancelled_tx.lock().unwrap().take() {
                        let _ = tx.send(ctx.is_cancelled());
                    }
                    std::future::pending::<()>().await;
                    Ok::<_, ServiceError>(())
                }
            }),
        )))
        .unwrap();
    server.start().await.unwrap();

    let client = TestClient::new(server.clone());
    let in_flight = tokio::spawn(async move { client.get("/stuck").send().await });
    while server.monitor().count() == 0 {
        tokio::task::yield_now().await;
    }

    let started = Instant::now();
    let outcome = server.stop().await;
    let elapsed = started.elapsed();

    let err = outcome.unwrap_err();
    assert!(err.is_timeout(), "expected a timeout, got {err}");
    assert!(matches!(err, ServerError::ShutdownTimeout { active: 1, .. }));
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_millis(6500), "stop took {elapsed:?}");

    // Abandoned requests see their context cancelled.
    let seen = tokio::time::timeout(Duration::from_secs(1), cancelled_rx)
        .await
        .expect("handler context was not cancelled")
        .unwrap();
    assert!(seen);

    // The failure is replayed to later callers.
    assert_eq!(server.stop().await, Err(err));
    in_flight.abort();
}

#[tokio::test]
async fn scenario_e_publisher_round_trip() {
    let received: Arc<Mutex<Vec<PublishRecord>>> = Arc::default();

    let server = common::simple_server();
    let sink = Arc::clone(&received);
    server
        .register(&ServiceDef::new("sink").route(Route::post(
            "/publish",
            Endpoint::json(move |_ctx: RequestContext, batch: PublishBatch| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().extend(batch.records);
                    Ok::<_, ServiceError>(())
                }
            }),
        )))
        .unwrap();
    server.start().await.unwrap();

    let url = format!("http://127.0.0.1:{}/publish", server.http_addr().port());
    let publisher = HttpPublisher::new(url).unwrap();
    let original = Bytes::from_static(br#"{"hello":"world"}"#);

    publisher
        .publish_raw(&RequestContext::background(), "k", original.clone())
        .await
        .unwrap();

    {
        let records = received.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "k");
        assert_eq!(records[0].decode_body().unwrap(), original);
    }

    // The typed helper produces the same bytes, with context attributes attached.
    let mut ctx = RequestContext::background();
    MessageAttributes::new().with("source", "scenario").attach(&mut ctx);
    publisher.publish(&ctx, "k", &json!({"hello": "world"})).await.unwrap();
    {
        let records = received.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].decode_body().unwrap(), original);
        assert_eq!(records[1].attributes.get("source"), Some("scenario"));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_e_publisher_reports_http_errors() {
    let server = common::simple_server();
    server.start().await.unwrap();

    let url = format!("http://127.0.0.1:{}/missing", server.http_addr().port());
    let publisher = HttpPublisher::new(url).unwrap();
    let err = publisher
        .publish_raw(&RequestContext::background(), "k", Bytes::from_static(b"{}"))
        .await
        .unwrap_err();
    assert!(matches!(err, gizmo::pubsub::PubSubError::Http { status: 404, .. }));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn scenario_f_subscriber_at_least_once() {
    let subscriber = TestSubscriber::new(["m1", "m2", "m3"]);
    let mut stream = subscriber.start().unwrap();

    for expected in ["m1", "m2", "m3"] {
        let message = stream.recv().await.unwrap();
        assert_eq!(message.body(), &Bytes::from(expected));
        message.done().await.unwrap();
    }
    assert_eq!(subscriber.acked().len(), 3);

    subscriber.stop().await.unwrap();
    assert!(stream.recv().await.is_none());
    assert!(subscriber.err().is_none());
}

#[tokio::test]
async fn scenario_f_queue_subscriber_at_least_once() {
    let queue = MemoryQueue::new();
    let ctx = RequestContext::background();
    for body in ["m1", "m2", "m3"] {
        queue.publish_raw(&ctx, "k", Bytes::from(body)).await.unwrap();
    }

    let config = QueueSubscriberConfig::default()
        .with_receive_timeout(Duration::from_millis(50))
        .with_idle_sleep(Duration::from_millis(10))
        .with_ack_flush_interval(Duration::from_millis(20));
    let subscriber = QueueSubscriber::new(queue.clone(), config);
    let mut stream = subscriber.start().unwrap();

    for expected in ["m1", "m2", "m3"] {
        let message = stream.recv().await.unwrap();
        assert_eq!(message.body(), &Bytes::from(expected));
        message.done().await.unwrap();
    }
    assert_eq!(queue.ack_count(), 3);

    subscriber.stop().await.unwrap();
    assert!(stream.recv().await.is_none());
    assert!(subscriber.err().is_none());
}
