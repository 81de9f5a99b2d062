//! End-to-end routing scenarios against a scripted upstream

use bytes::Bytes;
use futures::StreamExt;
use gateway_core::{GatewayError, IamRule, IamRuleType, IamRuleValue, RecordStatus};
use gateway_routing::RouteOutcome;
use pretty_assertions::assert_eq;
use serde_json::Value;

use crate::fixtures::*;
use crate::mock_transport::MockReply;

const DONE: &str = "data: [DONE]";

async fn collect_sse(outcome: RouteOutcome) -> String {
    let RouteOutcome::Stream { stream, .. } = outcome else {
        panic!("expected a stream");
    };
    let frames: Vec<Bytes> = stream.frames.collect().await;
    frames
        .iter()
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .collect()
}

fn error_event_data(sse: &str) -> Value {
    let event = sse
        .split("\n\n")
        .find(|event| event.starts_with("event: error\n"))
        .expect("error event");
    let data = event
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("error data");
    serde_json::from_str(data).expect("error json")
}

fn three_provider_gateway() -> TestGateway {
    TestGateway::builder()
        .provider("alpha")
        .provider("beta")
        .provider("gamma")
        .model(text_model(
            "tri-model",
            &[("alpha", 0.000_001), ("beta", 0.000_002), ("gamma", 0.000_003)],
        ))
        .build()
}

fn deny_provider(gateway: &TestGateway, provider: &str) {
    gateway.store.insert_iam_rule(IamRule {
        id: format!("deny-{provider}"),
        api_key_id: TEST_API_KEY_ID.to_string(),
        rule_type: IamRuleType::DenyProviders,
        rule_value: IamRuleValue {
            providers: vec![provider.to_string()],
            ..IamRuleValue::default()
        },
        status: RecordStatus::Active,
    });
}

#[tokio::test]
async fn test_unhealthy_keys_are_skipped_without_dispatch() {
    let gateway = three_provider_gateway();
    for provider in ["alpha", "beta"] {
        for _ in 0..3 {
            gateway.health.report_error(&secret_name(provider), 0, Some(500));
        }
        assert!(!gateway.health.is_healthy(&secret_name(provider), 0));
    }
    gateway
        .transport
        .reply("gamma", MockReply::json(&completion_body("served by gamma")));

    let outcome = gateway
        .router
        .route(chat_request("tri-model", false), &test_caller())
        .await
        .expect("routed");

    assert_eq!(outcome.info().provider, "gamma");
    assert_eq!(outcome.info().attempts, 1);
    assert_eq!(gateway.transport.call_count("alpha"), 0);
    assert_eq!(gateway.transport.call_count("beta"), 0);
    assert_eq!(gateway.transport.call_count("gamma"), 1);

    let RouteOutcome::Completion { body, .. } = outcome else {
        panic!("expected a completion");
    };
    assert_eq!(body["choices"][0]["message"]["content"], "served by gamma");
}

#[tokio::test]
async fn test_no_healthy_key_anywhere() {
    let gateway = three_provider_gateway();
    for provider in ["alpha", "beta", "gamma"] {
        gateway.health.report_error(&secret_name(provider), 0, Some(401));
    }

    let err = gateway
        .router
        .route(chat_request("tri-model", false), &test_caller())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::NoHealthyCredential { .. }));
    assert_eq!(err.status_code(), 503);
    assert!(gateway.transport.calls().is_empty());
}

#[tokio::test]
async fn test_fallback_walks_candidates_in_price_order() {
    let gateway = three_provider_gateway();
    gateway
        .transport
        .reply("alpha", MockReply::status(503, r#"{"error":{"message":"overloaded"}}"#));
    gateway.transport.reply("beta", MockReply::ConnectError);
    gateway
        .transport
        .reply("gamma", MockReply::json(&completion_body("third time lucky")));

    let outcome = gateway
        .router
        .route(chat_request("tri-model", false), &test_caller())
        .await
        .expect("routed");

    assert_eq!(outcome.info().provider, "gamma");
    assert_eq!(outcome.info().attempts, 3);
    let order: Vec<String> = gateway
        .transport
        .calls()
        .into_iter()
        .map(|call| call.provider)
        .collect();
    assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    assert_eq!(
        gateway
            .health
            .get(&secret_name("alpha"), 0)
            .expect("alpha health")
            .consecutive_errors,
        1
    );
}

#[tokio::test]
async fn test_upstream_request_uses_mapping_model_name() {
    let gateway = three_provider_gateway();
    gateway
        .transport
        .reply("alpha", MockReply::json(&completion_body("ok")));

    gateway
        .router
        .route(chat_request("tri-model", false), &test_caller())
        .await
        .expect("routed");

    let calls = gateway.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "http://alpha.test/v1/chat/completions");
    assert_eq!(calls[0].body["model"], "tri-model-upstream");
    assert!(!calls[0].stream);
}

#[tokio::test]
async fn test_empty_stream_reports_single_error_before_done() {
    let gateway = three_provider_gateway();
    gateway
        .transport
        .reply("alpha", MockReply::sse(&[role_delta()]));

    let outcome = gateway
        .router
        .route(chat_request("tri-model", true), &test_caller())
        .await
        .expect("routed");
    assert_eq!(outcome.info().provider, "alpha");
    let sse = collect_sse(outcome).await;

    assert_eq!(sse.matches("event: error").count(), 1);
    assert_eq!(sse.matches(DONE).count(), 1);
    let error_at = sse.find("event: error").expect("error event");
    let done_at = sse.find(DONE).expect("done");
    assert!(error_at < done_at);
    assert!(sse.ends_with("data: [DONE]\n\n"));
    assert_eq!(error_event_data(&sse)["error"]["type"], "upstream_error");

    // Committed to the first candidate
    assert_eq!(gateway.transport.calls().len(), 1);
}

#[tokio::test]
async fn test_stream_forwards_content_then_done() {
    let gateway = three_provider_gateway();
    gateway.transport.reply(
        "alpha",
        MockReply::sse(&[role_delta(), content_delta("Hel"), content_delta("lo")]),
    );

    let outcome = gateway
        .router
        .route(chat_request("tri-model", true), &test_caller())
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
    let summary = stream.summary.await.expect("summary");

    assert!(!sse.contains("event: error"));
    assert!(sse.contains("\"content\":\"Hel\""));
    assert!(sse.contains("\"model\":\"tri-model\""));
    assert!(sse.ends_with("data: [DONE]\n\n"));
    assert!(summary.produced_output);
    assert_eq!(summary.error, None);
    assert!(gateway.transport.calls()[0].stream);
}

#[tokio::test]
async fn test_broken_stream_falls_back_before_first_byte() {
    let gateway = three_provider_gateway();
    gateway.transport.reply("alpha", MockReply::BrokenBody);
    gateway
        .transport
        .reply("beta", MockReply::sse(&[content_delta("from beta")]));

    let outcome = gateway
        .router
        .route(chat_request("tri-model", true), &test_caller())
        .await
        .expect("routed");

    assert_eq!(outcome.info().provider, "beta");
    assert_eq!(outcome.info().attempts, 2);
    let sse = collect_sse(outcome).await;
    assert!(sse.contains("from beta"));
}

#[tokio::test]
async fn test_iam_denied_sole_candidate_is_rejected() {
    let gateway = TestGateway::builder()
        .provider("p")
        .provider("q")
        .model(text_model("p-only", &[("p", 0.000_001)]))
        .model(text_model("p-or-q", &[("p", 0.000_001), ("q", 0.000_002)]))
        .build();
    deny_provider(&gateway, "p");

    let err = gateway
        .router
        .route(chat_request("p-only", false), &test_caller())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::AccessDenied { .. }));
    assert_eq!(err.kind_name(), "IamException");
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.code(), "access_denied");
    assert!(gateway.transport.calls().is_empty());
}

#[tokio::test]
async fn test_iam_denied_provider_falls_through_to_alternate() {
    let gateway = TestGateway::builder()
        .provider("p")
        .provider("q")
        .model(text_model("p-only", &[("p", 0.000_001)]))
        .model(text_model("p-or-q", &[("p", 0.000_001), ("q", 0.000_002)]))
        .build();
    deny_provider(&gateway, "p");
    gateway
        .transport
        .reply("q", MockReply::json(&completion_body("served by q")));

    let outcome = gateway
        .router
        .route(chat_request("p-or-q", false), &test_caller())
        .await
        .expect("routed");

    assert_eq!(outcome.info().provider, "q");
    assert_eq!(outcome.info().attempts, 1);
    assert_eq!(gateway.transport.call_count("p"), 0);
}
