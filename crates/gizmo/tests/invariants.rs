//! Request handling invariants checked through the public API.

mod common;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use proptest::prelude::*;
use proptest::test_runner::TestRunner;
use serde_json::{json, Value};

use gizmo::core::{Endpoint, Reply, RequestContext, ServiceError};
use gizmo::server::{Route, Server, ServiceDef, PANIC_BODY};
use gizmo_test::TestClient;

#[derive(serde::Deserialize)]
struct Order {
    quantity: u32,
}

fn status_server() -> Server {
    let server = common::simple_server();
    server
        .register(
            &ServiceDef::new("orders")
                .route(Route::post(
                    "/orders",
                    Endpoint::json(|_ctx: RequestContext, order: Order| async move {
                        if order.quantity == 0 {
                            return Err(ServiceError::status(
                                StatusCode::UNPROCESSABLE_ENTITY,
                                "quantity must be positive",
                            ));
                        }
                        Ok(Reply::new(json!({"quantity": order.quantity}))
                            .with_status(StatusCode::CREATED))
                    }),
                ))
                .route(Route::get(
                    "/orders",
                    Endpoint::json_no_body(|_ctx: RequestContext| async {
                        Ok::<_, ServiceError>(Vec::<u32>::new())
                    }),
                )),
        )
        .unwrap();
    server
}

#[tokio::test]
async fn test_status_comes_from_decoder_business_or_default() {
    let client = TestClient::new(status_server());

    // Decoder error.
    let response = client.post("/orders").body("{not json").send().await;
    response.assert_status_code(400);
    assert!(response.error_message().unwrap().contains("decode"));

    // Business status hook.
    client
        .post("/orders")
        .json(&json!({"quantity": 3}))
        .send()
        .await
        .assert_status_code(201)
        .assert_json_eq(&json!({"quantity": 3}));

    // Business error status.
    let response = client.post("/orders").json(&json!({"quantity": 0})).send().await;
    response.assert_status_code(422);
    assert_eq!(response.error_message().as_deref(), Some("quantity must be positive"));

    // Encoder default.
    client.get("/orders").send().await.assert_status_code(200).assert_json_eq(&json!([]));
}

#[tokio::test]
async fn test_panic_yields_fixed_500_and_releases_monitor() {
    let server = common::simple_server();
    server
        .register(&ServiceDef::new("boom").route(Route::get(
            "/boom",
            Endpoint::json_no_body(|_ctx: RequestContext| async {
                if std::hint::black_box(true) {
                    panic!("handler exploded");
                }
                Ok::<_, ServiceError>(())
            }),
        )))
        .unwrap();
    let client = TestClient::new(server.clone());

    for _ in 0..3 {
        let response = client.get("/boom").send().await;
        response.assert_status_code(500).assert_body_eq(PANIC_BODY);
        assert_eq!(server.monitor().count(), 0);
    }
}

#[tokio::test]
async fn test_no_request_enters_after_stop_begins() {
    let server = common::simple_server();
    server
        .register(&ServiceDef::new("slow").route(Route::get(
            "/slow",
            Endpoint::json_no_body(|_ctx: RequestContext| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, ServiceError>("done")
            }),
        )))
        .unwrap();
    server.start().await.unwrap();

    let client = TestClient::new(server.clone());
    let slow = tokio::spawn({
        let client = client.clone();
        async move { client.get("/slow").send().await }
    });
    while server.monitor().count() == 0 {
        tokio::task::yield_now().await;
    }

    let started = Instant::now();
    let stopping = tokio::spawn({
        let server = server.clone();
        async move { server.stop().await }
    });
    while !server.monitor().is_draining() {
        tokio::task::yield_now().await;
    }

    let refused = client.get("/slow").send().await;
    refused.assert_status_code(503);
    assert_eq!(server.monitor().count(), 1);

    slow.await.unwrap().assert_status_code(200).assert_json_eq(&json!("done"));
    stopping.await.unwrap().unwrap();
    assert!(started.elapsed() < server.config().shutdown_timeout + Duration::from_millis(500));
}

#[test]
fn test_json_put_echo_round_trip() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let server = runtime.block_on(async {
        let server = common::simple_server();
        server
            .register(&ServiceDef::new("echo").route(Route::put(
                "/echo",
                Endpoint::json(|_ctx: RequestContext, body: Value| async move {
                    Ok::<_, ServiceError>(body)
                }),
            )))
            .unwrap();
        server
    });
    let client = TestClient::new(server);

    let documents = prop::collection::btree_map(
        "[a-z]{1,8}",
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,16}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(Value::from),
        ],
        0..6,
    );

    let mut runner = TestRunner::default();
    runner
        .run(&documents, |document: BTreeMap<String, Value>| {
            let request = serde_json::to_vec(&document).unwrap();
            let response = runtime.block_on(
                client
                    .put("/echo")
                    .header("content-type", "application/json")
                    .body(Bytes::from(request.clone()))
                    .send(),
            );
            prop_assert_eq!(response.status(), StatusCode::OK);
            prop_assert_eq!(response.body().as_ref(), request.as_slice());
            Ok(())
        })
        .unwrap();
}
