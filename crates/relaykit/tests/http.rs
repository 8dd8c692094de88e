//! HTTP client transport tests against a mock server
//!
//! Canned server-sent-events bodies verify the client's wire behavior in
//! isolation: request shape, response parsing, error-status handling, and
//! side-stream demultiplexing.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;

use futures::StreamExt;
use relaykit::{
    Error, HttpClientTransport, NodeDescriptor, NodeHandlerContext, NodeValue, ProxyClient,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(frames: &[serde_json::Value]) -> String {
    frames
        .iter()
        .map(|frame| format!("data: {frame}\n\n"))
        .collect()
}

async fn mock_proxy_server(frames: &[serde_json::Value]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .and(header("content-type", "application/json"))
        .and(header("credentials", "include"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(frames)),
        )
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer) -> ProxyClient<HttpClientTransport> {
    let transport = HttpClientTransport::new(&format!("{}/proxy", server.uri())).unwrap();
    ProxyClient::new(transport)
}

#[tokio::test]
async fn test_request_is_a_tagged_tuple() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .and(header("credentials", "include"))
        .and(body_partial_json(json!([
            "proxy",
            { "node": { "id": "n1", "type": "fetch" }, "inputs": { "url": "http://x" } }
        ])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(&[json!(["proxy", {"outputs": {"status": 200}}])])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let inputs = BTreeMap::from([(
        "url".to_string(),
        NodeValue::String("http://x".to_string()),
    )]);
    let outputs = client
        .proxy(
            NodeDescriptor::new("n1", "fetch"),
            inputs,
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(outputs.get("status"), Some(&NodeValue::Number(200.into())));
}

#[tokio::test]
async fn test_error_response_surfaces_the_server_message() {
    let server = mock_proxy_server(&[json!([
        "error",
        { "error": "Can't proxy a node of this node type.", "timestamp": 1234.5 }
    ])])
    .await;

    let client = client_for(&server);
    let err = client
        .proxy(
            NodeDescriptor::new("n1", "secrets"),
            BTreeMap::new(),
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap_err();
    match err {
        Error::RemoteExecution(message) => {
            assert_eq!(message, "Can't proxy a node of this node type.");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_response_body_is_an_error() {
    let server = mock_proxy_server(&[]).await;

    let client = client_for(&server);
    let err = client
        .proxy(
            NodeDescriptor::new("n1", "fetch"),
            BTreeMap::new(),
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyResponse));
}

#[tokio::test]
async fn test_non_success_status_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .proxy(
            NodeDescriptor::new("n1", "fetch"),
            BTreeMap::new(),
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap_err();
    match err {
        Error::Transport(message) => {
            assert!(message.contains("500"), "unexpected message: {message}");
            assert!(message.contains("internal"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_side_stream_frames_become_a_value_stream() {
    let server = mock_proxy_server(&[
        json!(["proxy", {"outputs": {"data": {"$type": "Stream", "id": 0}}}]),
        json!(["http-stream-chunk", {"chunk": "alpha"}]),
        json!(["http-stream-chunk", {"chunk": "beta"}]),
        json!(["http-stream-end", {}]),
    ])
    .await;

    let client = client_for(&server);
    let mut outputs = client
        .proxy(
            NodeDescriptor::new("n1", "fetch"),
            BTreeMap::new(),
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap();
    let Some(NodeValue::Stream(data)) = outputs.remove("data") else {
        panic!("expected a substituted stream");
    };
    let chunks: Vec<_> = data.collect().await;
    assert_eq!(chunks, vec![json!("alpha"), json!("beta")]);
}

#[tokio::test]
async fn test_garbage_record_is_a_malformed_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("data: not json at all\n\n".to_string()),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .proxy(
            NodeDescriptor::new("n1", "fetch"),
            BTreeMap::new(),
            &NodeHandlerContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedFrame(_)));
}
