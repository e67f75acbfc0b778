//! End-to-end tests over TCP with in-memory container and proxy adapters.

use super::helpers::{Client, Fabric, eventually, fabric, start_server};
use reactor_fabric::protocol::{JsonRpcRequest, codes};
use rstest::rstest;
use serde_json::{Value, json};

fn tool_call(id: u64, name: &str, arguments: Value) -> JsonRpcRequest {
    JsonRpcRequest::new(id, "tools/call", Some(json!({"name": name, "arguments": arguments})))
}

fn register(id: u64) -> JsonRpcRequest {
    tool_call(
        id,
        "fabric/registerClient",
        json!({"mounts": [{"source": "/home/alice/project", "target": "/workspace", "readOnly": true}]}),
    )
}

fn error_code(response: &reactor_fabric::protocol::JsonRpcResponse) -> Option<i64> {
    response.error.as_ref().map(|error| error.code)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn registered_client_calls_a_service_tool(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut client = Client::connect(server.address).await.expect("connect");

    let initialize = client
        .call(&JsonRpcRequest::new(1, "initialize", Some(json!({}))))
        .await;
    let early = client.call(&tool_call(2, "git/status", json!({}))).await;
    let registration = client.call(&register(3)).await;
    let status = client
        .call(&tool_call(4, "git/status", json!({"path": "."})))
        .await;

    let tools = initialize
        .result
        .as_ref()
        .and_then(|result| result.get("tools"))
        .and_then(Value::as_array)
        .map(Vec::len);
    assert_eq!(tools, Some(2));
    assert_eq!(error_code(&early), Some(codes::INTERNAL_ERROR));
    assert!(!registration.is_error());
    assert_eq!(status.id, json!(4));
    assert!(status.result.is_some());

    let specs = fabric.runtime.live_specs().expect("live specs");
    let binds: Vec<String> = specs
        .iter()
        .flat_map(|spec| spec.mounts().iter().map(|mount| mount.to_bind_string()))
        .collect();
    assert_eq!(binds, vec!["/home/alice/project:/workspace:ro".to_owned()]);

    server.shutdown.cancel();
    server
        .handle
        .await
        .expect("server task should not panic")
        .expect("server should stop cleanly");
    assert_eq!(fabric.runtime.counters().expect("counters").live, 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn disconnect_stops_the_session_containers(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut client = Client::connect(server.address).await.expect("connect");
    client.call(&register(1)).await;
    client.call(&tool_call(2, "git/status", json!({}))).await;
    assert_eq!(fabric.runtime.counters().expect("counters").live, 1);

    drop(client);

    let runtime = fabric.runtime.clone();
    assert!(
        eventually(|| runtime.counters().is_ok_and(|counters| counters.live == 0)).await,
        "containers should be stopped after disconnect"
    );
    server.shutdown.cancel();
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn malformed_line_gets_parse_error_then_close(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut client = Client::connect(server.address).await.expect("connect");

    client.send_line("{not json").await;
    let reply = client.receive().await.expect("parse error reply");
    let closed = client.receive().await;

    assert_eq!(reply.id, Value::Null);
    assert_eq!(error_code(&reply), Some(codes::PARSE_ERROR));
    assert!(closed.is_none());
    server.shutdown.cancel();
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn errors_keep_the_connection_open(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut client = Client::connect(server.address).await.expect("connect");
    client.call(&register(1)).await;

    let unknown_method = client
        .call(&JsonRpcRequest::new(2, "resources/list", None))
        .await;
    let unknown_service = client.call(&tool_call(3, "nope/run", json!({}))).await;
    client
        .send_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    let ping = client.call(&JsonRpcRequest::new(4, "ping", None)).await;

    assert_eq!(error_code(&unknown_method), Some(codes::METHOD_NOT_FOUND));
    assert_eq!(error_code(&unknown_service), Some(codes::SERVICE_NOT_FOUND));
    assert_eq!(ping.id, json!(4));
    assert_eq!(ping.result, Some(json!({})));
    server.shutdown.cancel();
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn sessions_are_isolated(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut first = Client::connect(server.address).await.expect("connect");
    let mut second = Client::connect(server.address).await.expect("connect");
    first.call(&register(1)).await;
    second.call(&register(1)).await;

    first.call(&tool_call(2, "git/status", json!({}))).await;
    second.call(&tool_call(2, "git/status", json!({}))).await;
    drop(first);

    let runtime = fabric.runtime.clone();
    assert!(eventually(|| runtime.counters().is_ok_and(|counters| counters.live == 1)).await);
    let forwarded = fabric.proxy.forwarded().expect("forwarded");
    let containers: std::collections::BTreeSet<&str> = forwarded
        .iter()
        .map(|call| call.container_id.as_str())
        .collect();
    assert_eq!(containers.len(), 2);
    server.shutdown.cancel();
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn per_call_service_leaves_no_container_behind(fabric: Fabric) {
    let server = start_server(fabric.orchestrator.clone())
        .await
        .expect("server should start");
    let mut client = Client::connect(server.address).await.expect("connect");
    client.call(&register(1)).await;

    let first = client.call(&tool_call(2, "sandbox/run", json!({"code": "1+1"}))).await;
    let second = client.call(&tool_call(3, "sandbox/run", json!({"code": "2+2"}))).await;

    assert!(!first.is_error() && !second.is_error());
    let counters = fabric.runtime.counters().expect("counters");
    assert_eq!((counters.created, counters.live), (2, 0));
    server.shutdown.cancel();
}
