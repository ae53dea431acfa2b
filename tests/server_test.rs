//! Socket-level test: a real listener, a real client, graceful shutdown.

mod common;

use std::time::Duration;

use axum::http::Method;
use serde_json::Value;

use common::*;
use rpc_pipeline::HttpService;

#[tokio::test]
async fn test_serves_over_tcp_and_shuts_down() {
    let service = HttpService::builder(test_config())
        .route(Method::POST, "/hello", "/helloworld.Greeter/SayHello", say_hello)
        .build()
        .unwrap();
    let (addr, shutdown, handle) = start_server(service).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/hello"))
        .header("traceparent", traceparent())
        .json(&serde_json::json!({"name": "ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()["trace-id"], TRACE_ID);
    assert_eq!(resp.headers()["span-id"], SPAN_ID);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 200);
    assert_eq!(body["data"]["message"], "hello ada");

    let resp = client.get(format!("http://{addr}/missing")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), r#"{"code":404}"#);

    drop(client);
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}
