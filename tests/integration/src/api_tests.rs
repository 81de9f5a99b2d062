//! HTTP API tests through the full axum application

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
};
use gateway_core::{IamRule, IamRuleType, IamRuleValue, RecordStatus};
use gateway_server::handlers::PROVIDER_HEADER;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::fixtures::*;
use crate::mock_transport::MockReply;

fn gateway() -> TestGateway {
    TestGateway::builder()
        .provider("alpha")
        .provider("beta")
        .model(text_model("duo", &[("alpha", 0.000_001), ("beta", 0.000_002)]))
        .build()
}

fn post_chat(token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

fn chat_body(model: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "stream": stream,
        "messages": [{"role": "user", "content": "Hello"}]
    })
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}

#[tokio::test]
async fn test_completion_reports_serving_provider() {
    let gw = gateway();
    gw.transport
        .reply("alpha", MockReply::status(502, "bad gateway"));
    gw.transport
        .reply("beta", MockReply::json(&completion_body("from beta")));

    let response = gw
        .app()
        .oneshot(post_chat(Some(TEST_TOKEN), &chat_body("duo", false)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[PROVIDER_HEADER], "beta");
    let body = body_json(response).await;
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "duo");
    assert_eq!(body["choices"][0]["message"]["content"], "from beta");
}

#[tokio::test]
async fn test_exhausted_candidates_surface_last_upstream_error() {
    let gw = gateway();
    gw.transport
        .reply("alpha", MockReply::status(503, "unavailable"));
    gw.transport
        .reply("beta", MockReply::status(500, r#"{"error":{"message":"beta down"}}"#));

    let response = gw
        .app()
        .oneshot(post_chat(Some(TEST_TOKEN), &chat_body("duo", false)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "upstream_error");
    assert!(body["error"]["responseText"]
        .as_str()
        .expect("response text")
        .contains("beta down"));
}

#[tokio::test]
async fn test_empty_stream_over_http() {
    let gw = gateway();
    gw.transport
        .reply("alpha", MockReply::sse(&[role_delta()]));

    let response = gw
        .app()
        .oneshot(post_chat(Some(TEST_TOKEN), &chat_body("duo", true)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    let text = body_text(response).await;
    assert_eq!(text.matches("event: error").count(), 1);
    assert_eq!(text.matches("data: [DONE]").count(), 1);
    assert!(text.find("event: error") < text.find("data: [DONE]"));
}

#[tokio::test]
async fn test_iam_denial_is_forbidden() {
    let gw = TestGateway::builder()
        .provider("p")
        .model(text_model("p-only", &[("p", 0.000_001)]))
        .build();
    gw.store.insert_iam_rule(IamRule {
        id: "deny-p".to_string(),
        api_key_id: TEST_API_KEY_ID.to_string(),
        rule_type: IamRuleType::DenyProviders,
        rule_value: IamRuleValue {
            providers: vec!["p".to_string()],
            ..IamRuleValue::default()
        },
        status: RecordStatus::Active,
    });

    let response = gw
        .app()
        .oneshot(post_chat(Some(TEST_TOKEN), &chat_body("p-only", false)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "access_denied");
    assert!(gw.transport.calls().is_empty());
}

#[tokio::test]
async fn test_missing_api_key_is_unauthorized() {
    let gw = gateway();
    let response = gw
        .app()
        .oneshot(post_chat(None, &chat_body("duo", false)))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn test_empty_messages_are_rejected() {
    let gw = gateway();
    let response = gw
        .app()
        .oneshot(post_chat(
            Some(TEST_TOKEN),
            &json!({"model": "duo", "messages": []}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "client_error");
    assert!(gw.transport.calls().is_empty());
}

#[tokio::test]
async fn test_health_reports_unhealthy_keys() {
    let gw = gateway();
    gw.health.report_error(&secret_name("alpha"), 0, Some(403));

    let response = gw
        .app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["models"], 1);
    assert_eq!(body["unhealthy_keys"], 1);
}
