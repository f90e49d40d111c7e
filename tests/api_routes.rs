//! Integration tests for the HTTP API
//!
//! The router is driven in-process with the in-memory cache and the
//! deterministic local provider, so these run hermetically.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use teller::cache::Cache;
use teller::config::Config;
use teller::llm::LocalGenerator;
use teller::server::{app, AppState};

fn test_state() -> Arc<AppState> {
    let mut config = Config::default();
    config.auth.bcrypt_cost = 4; // keep the suite fast
    config.market.base_url = "http://127.0.0.1:1".to_string();
    Arc::new(AppState::with_parts(
        config,
        Cache::in_memory(),
        Arc::new(LocalGenerator::new()),
    ))
}

fn router(state: &Arc<AppState>) -> Router {
    app(state.clone())
}

fn user_token(state: &Arc<AppState>) -> String {
    state
        .tokens
        .issue("alice", &["user".to_string()], None)
        .expect("token issue")
}

fn admin_token(state: &Arc<AppState>) -> String {
    state
        .tokens
        .issue("root", &["user".to_string(), "admin".to_string()], None)
        .expect("token issue")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

#[tokio::test]
async fn health_is_public() {
    let state = test_state();
    let response = router(&state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body.get("version").is_some());
}

#[tokio::test]
async fn chat_requires_a_token() {
    let state = test_state();
    let response = router(&state)
        .oneshot(json_request("POST", "/chat", None, &json!({"text": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Could not validate credentials");
}

#[tokio::test]
async fn garbage_token_gets_the_same_generic_401() {
    let state = test_state();
    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some("not.a.token"),
            &json!({"text": "hi"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Could not validate credentials");
}

#[tokio::test]
async fn register_login_chat_flow() {
    let state = test_state();

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "hunter2",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["username"], "alice");
    assert!(
        body.get("hashed_password").is_none(),
        "password hash must never serialize"
    );

    let response = router(&state)
        .oneshot(
            Request::post("/token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("username=alice&password=hunter2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let grant = body_json(response).await;
    assert_eq!(grant["token_type"], "bearer");
    assert_eq!(grant["expires_in"], 1800);
    let token = grant["access_token"].as_str().unwrap().to_string();

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "What is the stock price?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert!(reply["response"].as_str().unwrap().len() > 0);
    assert!(reply["confidence"].as_f64().unwrap() > 0.0);
    assert!(reply.get("context_id").is_some());
}

#[tokio::test]
async fn wrong_password_is_rejected_on_login() {
    let state = test_state();
    router(&state)
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "hunter2",
            }),
        ))
        .await
        .unwrap();

    let response = router(&state)
        .oneshot(
            Request::post("/auth/login")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("username=alice&password=wrong"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_continues_a_conversation() {
    let state = test_state();
    let token = user_token(&state);

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "What is the stock price?"}),
        ))
        .await
        .unwrap();
    let first = body_json(response).await;
    let context_id = first["context_id"].as_str().unwrap().to_string();

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "and tomorrow?", "context_id": context_id}),
        ))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(second["context_id"].as_str().unwrap(), context_id);

    // Both turns are stored under the one conversation
    let id = context_id.parse().unwrap();
    let snapshot = state.contexts.get(&id).unwrap();
    assert_eq!(snapshot.turns.len(), 2);
    assert_eq!(snapshot.topic.as_deref(), Some("financial"));
}

#[tokio::test]
async fn unknown_context_id_starts_fresh() {
    let state = test_state();
    let token = user_token(&state);

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "hi", "context_id": "11111111-2222-3333-4444-555555555555"}),
        ))
        .await
        .unwrap();
    let reply = body_json(response).await;
    assert_ne!(
        reply["context_id"].as_str().unwrap(),
        "11111111-2222-3333-4444-555555555555"
    );
}

#[tokio::test]
async fn responses_carry_rate_limit_headers() {
    let state = test_state();
    let token = user_token(&state);

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "hi"}),
        ))
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["X-RateLimit-Limit"], "100");
    assert_eq!(headers["X-RateLimit-Remaining"], "99");
    assert!(headers.contains_key("X-RateLimit-Reset"));
}

#[tokio::test]
async fn metrics_is_admin_only() {
    let state = test_state();

    let response = router(&state)
        .oneshot(
            Request::get("/metrics")
                .header("authorization", format!("Bearer {}", user_token(&state)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = router(&state)
        .oneshot(
            Request::get("/metrics")
                .header("authorization", format!("Bearer {}", admin_token(&state)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("total_requests").is_some());
    assert!(body.get("average_confidence").is_some());
}

#[tokio::test]
async fn metrics_reflect_chat_traffic() {
    let state = test_state();
    let token = user_token(&state);

    router(&state)
        .oneshot(json_request(
            "POST",
            "/chat",
            Some(&token),
            &json!({"text": "What is the stock price?"}),
        ))
        .await
        .unwrap();

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.successful_responses, 1);
    assert!(snapshot.average_confidence > 0.0);
}

#[tokio::test]
async fn train_requires_admin_scope() {
    let state = test_state();
    let spec = json!({
        "dataset_path": "/nonexistent/data.csv",
        "model_type": "gpt2",
        "epochs": 3,
        "batch_size": 8,
    });

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/train",
            Some(&user_token(&state)),
            &spec,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Admin passes the gate; the missing dataset is then a caller error
    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/train",
            Some(&admin_token(&state)),
            &spec,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn train_starts_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("data.csv");
    std::fs::write(&dataset, "text\nhello\n").unwrap();

    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    config.training.output_dir = dir.path().join("models");
    let state = Arc::new(AppState::with_parts(
        config,
        Cache::in_memory(),
        Arc::new(LocalGenerator::new()),
    ));

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/train",
            Some(&admin_token(&state)),
            &json!({
                "dataset_path": dataset.to_string_lossy(),
                "model_type": "gpt2",
                "epochs": 1,
                "batch_size": 4,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Training started");
    assert!(body["model_path"]
        .as_str()
        .unwrap()
        .contains("fine_tuned_"));
}

#[tokio::test]
async fn market_data_miss_is_404() {
    let state = test_state();
    let response = router(&state)
        .oneshot(
            Request::get("/financial/market-data/ZZZZ")
                .header("authorization", format!("Bearer {}", user_token(&state)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn market_data_serves_cached_quotes() {
    let state = test_state();
    state
        .cache
        .set("stock_price_ACME", &json!({"price": 42.0}), Some(60))
        .await
        .unwrap();

    let response = router(&state)
        .oneshot(
            Request::get("/financial/market-data/ACME")
                .header("authorization", format!("Bearer {}", user_token(&state)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["price"], 42.0);
}

#[tokio::test]
async fn financial_analyze_without_market_data() {
    let state = test_state();
    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/financial/analyze",
            Some(&user_token(&state)),
            &json!({"query": "Should I invest in the market?", "include_market_data": false}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["response"].as_str().unwrap().len() > 0);
    assert!(body["context"].get("market_data").is_none());
}

#[tokio::test]
async fn financial_analyze_enriches_with_cached_market_data() {
    let state = test_state();
    state
        .cache
        .set("stock_price_AAPL", &json!({"price": 190.0}), Some(60))
        .await
        .unwrap();

    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/financial/analyze",
            Some(&user_token(&state)),
            &json!({"query": "Should I buy AAPL stock?"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["context"]["market_data"]["AAPL"]["price"], 190.0);
}

#[tokio::test]
async fn support_query_reports_category_and_priority() {
    let state = test_state();
    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/support/query",
            Some(&user_token(&state)),
            &json!({"query": "my login is broken", "category": "account"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["context"]["category"], "account");
    assert_eq!(body["context"]["priority"], "normal");
    let confidence = body["confidence"].as_f64().unwrap();
    assert!(confidence > 0.0 && confidence <= 1.0);
}

#[tokio::test]
async fn support_categories_lists_the_fixed_set() {
    let state = test_state();
    let response = router(&state)
        .oneshot(
            Request::get("/support/categories")
                .header("authorization", format!("Bearer {}", user_token(&state)))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body,
        json!(["account", "billing", "technical", "product", "general"])
    );
}

#[tokio::test]
async fn support_feedback_is_acknowledged() {
    let state = test_state();
    let response = router(&state)
        .oneshot(json_request(
            "POST",
            "/support/feedback",
            Some(&user_token(&state)),
            &json!({"query_id": "q-123", "feedback": "solved it", "helpful": true}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "Feedback received");
}

#[tokio::test]
async fn users_me_reflects_the_registered_account() {
    let state = test_state();
    router(&state)
        .oneshot(json_request(
            "POST",
            "/auth/register",
            None,
            &json!({
                "username": "alice",
                "email": "alice@example.com",
                "password": "hunter2",
                "full_name": "Alice Example",
            }),
        ))
        .await
        .unwrap();

    let token = user_token(&state);
    let response = router(&state)
        .oneshot(
            Request::get("/auth/users/me")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["full_name"], "Alice Example");
    assert!(body.get("hashed_password").is_none());
}

#[tokio::test]
async fn duplicate_registration_is_a_bad_request() {
    let state = test_state();
    let alice = json!({
        "username": "alice",
        "email": "alice@example.com",
        "password": "hunter2",
    });

    let response = router(&state)
        .oneshot(json_request("POST", "/auth/register", None, &alice))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router(&state)
        .oneshot(json_request("POST", "/auth/register", None, &alice))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
