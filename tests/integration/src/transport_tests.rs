//! Routing through the real HTTP transport against wiremock upstreams

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use gateway_providers::ReqwestTransport;
use gateway_routing::RouteOutcome;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::*;

fn sse_body(deltas: &[serde_json::Value]) -> String {
    let mut body: String = deltas.iter().map(|d| format!("data: {d}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn gateway_for(servers: &[(&str, &MockServer)]) -> TestGateway {
    let prices: Vec<(&str, f64)> = servers
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (*id, 0.000_001 * (i + 1) as f64))
        .collect();
    let mut builder = TestGateway::builder()
        .model(text_model("wire-model", &prices))
        .upstream(Arc::new(ReqwestTransport::new().expect("transport")));
    for (id, server) in servers {
        builder = builder.provider_at(id, format!("{}/v1", server.uri()));
    }
    builder.build()
}

#[tokio::test]
async fn test_completion_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .and(body_partial_json(serde_json::json!({"model": "wire-model-upstream"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("over the wire")))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&[("local", &server)]);
    let outcome = gateway
        .router
        .route(chat_request("wire-model", false), &test_caller())
        .await
        .expect("routed");

    let RouteOutcome::Completion { info, body, summary } = outcome else {
        panic!("expected a completion");
    };
    assert_eq!(info.provider, "local");
    assert_eq!(body["choices"][0]["message"]["content"], "over the wire");
    assert_eq!(body["usage"]["total_tokens"], 8);
    assert!(summary.produced_output);
}

#[tokio::test]
async fn test_server_error_falls_back_to_next_upstream() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string(r#"{"error":{"message":"boom"}}"#),
        )
        .expect(1)
        .mount(&failing)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .expect(1)
        .mount(&healthy)
        .await;

    let gateway = gateway_for(&[("failing", &failing), ("healthy", &healthy)]);
    let outcome = gateway
        .router
        .route(chat_request("wire-model", false), &test_caller())
        .await
        .expect("routed");

    assert_eq!(outcome.info().provider, "healthy");
    assert_eq!(outcome.info().attempts, 2);
    let failing_health = gateway
        .health
        .get(&secret_name("failing"), 0)
        .expect("health record");
    assert_eq!(failing_health.consecutive_errors, 1);
}

#[tokio::test]
async fn test_client_error_is_returned_without_fallback() {
    let rejecting = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"error":{"message":"This model's maximum context length is 8192 tokens","code":"context_length_exceeded"}}"#,
        ))
        .expect(1)
        .mount(&rejecting)
        .await;
    let untouched = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("unused")))
        .expect(0)
        .mount(&untouched)
        .await;

    let gateway = gateway_for(&[("rejecting", &rejecting), ("untouched", &untouched)]);
    let err = gateway
        .router
        .route(chat_request("wire-model", false), &test_caller())
        .await
        .unwrap_err();

    assert_eq!(err.error_type(), "client_error");
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.upstream_status(), Some(400));
}

#[tokio::test]
async fn test_streaming_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse_body(&[role_delta(), content_delta("streamed "), content_delta("reply")]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&[("local", &server)]);
    let outcome = gateway
        .router
        .route(chat_request("wire-model", true), &test_caller())
        .await
        .expect("routed");
    let RouteOutcome::Stream { stream, .. } = outcome else {
        panic!("expected a stream");
    };
    let frames: Vec<Bytes> = stream.frames.collect().await;
    let sse: String = frames
        .iter()
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .collect();

    assert!(sse.contains("\"content\":\"streamed \""));
    assert!(sse.contains("\"content\":\"reply\""));
    assert!(!sse.contains("event: error"));
    assert_eq!(sse.matches("data: [DONE]").count(), 1);
}
