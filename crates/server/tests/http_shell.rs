mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode, header};
use futures::future::join_all;
use tower::ServiceExt;

use common::{Reply, ScriptedLlm, engine};
use nolia_server::config::ServerConfig;
use nolia_server::http::{AppState, MAX_BODY_BYTES, router};

fn test_config(kv: &[(&str, &str)]) -> ServerConfig {
    let map = kv
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    ServerConfig::from_kv(&map).unwrap()
}

fn test_state(llm: Arc<ScriptedLlm>) -> AppState {
    AppState::with_engine(test_config(&[]), engine(llm, Vec::new()))
}

fn app(state: AppState) -> Router {
    router(state).layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 10], 555))))
}

fn ask_body(question: &str) -> String {
    serde_json::json!({ "question": question, "useWeb": false }).to_string()
}

fn ask_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ask")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok_and_echoes_request_id() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("x-request-id", "my-trace.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "my-trace.1"
    );
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["requestId"], "my-trace.1");
    assert_eq!(json["env"], "development");
    assert!(json["uptimeSec"].is_u64());
}

#[tokio::test]
async fn invalid_request_id_header_is_replaced() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("x-request-id", "not valid!")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let echoed = response.headers().get("x-request-id").unwrap();
    assert_ne!(echoed, "not valid!");
    assert!(uuid::Uuid::parse_str(echoed.to_str().unwrap()).is_ok());
}

#[tokio::test]
async fn models_endpoint_lists_free_models() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()).with_models(vec!["free/a", "free/b"]));
    let app = app(test_state(llm));

    let response = app
        .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["provider"], "openrouter");
    assert_eq!(json["models"], serde_json::json!(["free/a", "free/b"]));
    assert_eq!(json["requiresApiKey"], false);
}

#[tokio::test]
async fn question_length_boundaries_match_the_contract() {
    // 0 chars -> 400, 1 char -> 200, 2000 -> 200, 2001 -> 400
    let cases = [
        (0usize, StatusCode::BAD_REQUEST),
        (1, StatusCode::OK),
        (2000, StatusCode::OK),
        (2001, StatusCode::BAD_REQUEST),
    ];

    for (len, expected) in cases {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Reply::Text("Answer."),
            Reply::Fail,
        ]));
        let app = app(test_state(llm));
        let response = app
            .oneshot(ask_request(&ask_body(&"x".repeat(len))))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "question length {}", len);
    }
}

#[tokio::test]
async fn validation_errors_carry_the_request_id_envelope() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));
    let response = app
        .oneshot(ask_request(&ask_body("")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("question"));
    assert!(!json["requestId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn eleventh_request_in_the_window_is_rate_limited() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));
    let body = serde_json::json!({ "question": "What time is it?" }).to_string();

    for i in 1..=10 {
        let response = app.clone().oneshot(ask_request(&body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {}", i);
        assert_eq!(
            response.headers().get("x-ratelimit-limit").unwrap(),
            "10"
        );
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .unwrap()
            .to_str()
            .unwrap()
            .parse::<u32>()
            .unwrap();
        assert_eq!(remaining, 10 - i);
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    let response = app.clone().oneshot(ask_request(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );
    let json = body_json(response).await;
    assert_eq!(json["message"], "Too Many Requests, please try again later");
    assert!(json["requestId"].is_string());
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));
    let oversized = format!(
        r#"{{"question": "{}"}}"#,
        "x".repeat(MAX_BODY_BYTES + 10)
    );
    let response = app.oneshot(ask_request(&oversized)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn missing_json_content_type_is_rejected() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ask")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from(ask_body("hello")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let state = test_state(Arc::clone(&llm));
    let app = app(state);
    let body = serde_json::json!({ "question": "What time is it?" }).to_string();

    let first = body_json(app.clone().oneshot(ask_request(&body)).await.unwrap()).await;
    let second = body_json(app.clone().oneshot(ask_request(&body)).await.unwrap()).await;

    // The cached response is returned verbatim, latency included.
    assert_eq!(first, second);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn concurrent_identical_requests_run_the_pipeline_once() {
    let llm = Arc::new(
        ScriptedLlm::new(vec![Reply::Text("Answer."), Reply::Fail])
            .with_delay(Duration::from_millis(50)),
    );
    let state = test_state(Arc::clone(&llm));
    let app = app(state);
    let body = ask_body("Explain gravity");

    let responses = join_all((0..3).map(|_| {
        let app = app.clone();
        let body = body.clone();
        async move { app.oneshot(ask_request(&body)).await.unwrap() }
    }))
    .await;

    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["answer"], "Answer.");
    }

    // One composition call plus one follow-up call, shared by all callers.
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn anon_profiles_are_recorded_for_valid_ids_only() {
    let state = test_state(Arc::new(ScriptedLlm::new(Vec::new())));
    let profiles = state.profiles.clone();
    let app = app(state);
    let body = serde_json::json!({ "question": "What time is it?" }).to_string();

    let request = Request::builder()
        .method("POST")
        .uri("/api/ask")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-nolia-anon-id", "anon-123")
        .body(Body::from(body.clone()))
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles.get("anon-123").unwrap().ask_count, 1);

    let request = Request::builder()
        .method("POST")
        .uri("/api/ask")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-nolia-anon-id", "not a valid id!")
        .body(Body::from(body))
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(profiles.len(), 1, "invalid anon id must not create a profile");
}

#[tokio::test]
async fn robots_and_sitemap_compose_the_configured_origin() {
    let config = test_config(&[("PUBLIC_BASE_URL", "https://ask.example")]);
    let state = AppState::with_engine(config, engine(Arc::new(ScriptedLlm::new(Vec::new())), Vec::new()));
    let app = app(state);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/robots.txt").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("User-agent: *"));
    assert!(text.contains("Disallow: /api/"));
    assert!(text.contains("Sitemap: https://ask.example/sitemap.xml"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/sitemap.xml").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(xml.contains("<loc>https://ask.example/</loc>"));
    assert!(xml.contains("<changefreq>daily</changefreq>"));
}

#[tokio::test]
async fn forwarded_headers_drive_the_origin_when_unconfigured() {
    let app = app(test_state(Arc::new(ScriptedLlm::new(Vec::new()))));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/robots.txt")
                .header("x-forwarded-proto", "https")
                .header("x-forwarded-host", "edge.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("Sitemap: https://edge.example/sitemap.xml"));
}
