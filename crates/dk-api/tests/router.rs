use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dk_api::auth::{Claims, TokenVerifier};
use dk_api::{build_router, AppState};
use dk_config::ServerConfig;
use dk_llm::{ChatCompletion, ChatProvider, ChatRequest, LlmError, MessageRole};
use dk_quota::{LimitsTable, MemoryQuotaStore, Role, RoleLimits, UsageGate};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

/// Answers every request and bills a configurable number of tokens.
struct StubProvider {
    tokens: AtomicU64,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl StubProvider {
    fn new(tokens: u64) -> Self {
        Self {
            tokens: AtomicU64::new(tokens),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ChatProvider for StubProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(ChatCompletion {
            content: "You can request a hearing within 10 days.".to_string(),
            model: request.model.clone(),
            usage_tokens: self.tokens.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Fails like an upstream timeout.
struct DownProvider;

#[async_trait]
impl ChatProvider for DownProvider {
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        Err(LlmError::Timeout(60))
    }

    fn name(&self) -> &'static str {
        "down"
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.frontend_url = "http://localhost:5173".to_string();
    config.auth.jwt_secret = Some(SECRET.to_string());
    config.llm.api_key = Some("sk-test".to_string());
    config
}

fn app_with(provider: Arc<dyn ChatProvider>, free: RoleLimits) -> Router {
    let store = Arc::new(MemoryQuotaStore::new());
    let limits = LimitsTable::default().with(Role::Free, free);
    let gate = Arc::new(UsageGate::new(store, limits));
    build_router(AppState::from_parts(test_config(), gate, provider, true))
}

fn token(sub: &str, role: &str) -> String {
    TokenVerifier::new(SECRET).sign(&Claims {
        sub: sub.to_string(),
        role: Some(role.to_string()),
        exp: None,
    })
    .unwrap()
}

fn chat_request(bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/ai/chat")
        .header("content-type", "application/json");
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    builder
        .body(Body::from(
            r#"{"messages":[{"role":"user","content":"My landlord gave me a 3-day notice."}]}"#,
        ))
        .unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app_with(Arc::new(StubProvider::new(0)), RoleLimits::new(3, 1_000));
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["quota_store"], "memory");
    assert_eq!(json["llm_configured"], true);
}

#[tokio::test]
async fn fourth_call_is_rejected_with_usage_exceeded() {
    let provider = Arc::new(StubProvider::new(10));
    let app = app_with(provider.clone(), RoleLimits::new(3, 10_000));
    let bearer = token("user-1", "FREE");

    for remaining in ["2", "1", "0"] {
        let resp = app
            .clone()
            .oneshot(chat_request(Some(&bearer)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "3");
        assert_eq!(resp.headers()["x-ratelimit-remaining"], remaining);
    }

    let resp = app.oneshot(chat_request(Some(&bearer))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = json_body(resp).await;
    assert_eq!(json["code"], "usage_exceeded");
    assert_eq!(json["details"]["limit"], 3);
    // The rejected request never reached the provider.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn token_overrun_warns_then_blocks() {
    let provider = Arc::new(StubProvider::new(700));
    let app = app_with(provider.clone(), RoleLimits::new(10, 1_000));
    let bearer = token("user-2", "FREE");

    let resp = app
        .clone()
        .oneshot(chat_request(Some(&bearer)))
        .await
        .unwrap();
    let json = json_body(resp).await;
    assert!(json.get("warning").is_none());
    assert_eq!(json["quota"]["tokens"], 700);

    provider.tokens.store(400, Ordering::SeqCst);
    let resp = app
        .clone()
        .oneshot(chat_request(Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json["content"], "You can request a hearing within 10 days.");
    assert_eq!(json["usage_tokens"], 400);
    assert_eq!(json["quota"]["tokens"], 1_100);
    assert_eq!(json["warning"]["code"], "token_usage_exceeded");

    let resp = app.oneshot(chat_request(Some(&bearer))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(resp).await["code"], "token_usage_exceeded");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_role_gets_free_limits() {
    let app = app_with(Arc::new(StubProvider::new(1)), RoleLimits::new(2, 1_000));
    let bearer = token("intern-1", "INTERN");

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(chat_request(Some(&bearer)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "2");
    }
    let resp = app.oneshot(chat_request(Some(&bearer))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn pro_role_uses_its_own_limits() {
    let app = app_with(Arc::new(StubProvider::new(1)), RoleLimits::new(1, 1_000));
    let resp = app
        .oneshot(chat_request(Some(&token("pro-1", "PRO"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["x-ratelimit-limit"],
        LimitsTable::default().pro.calls_per_day.to_string().as_str()
    );
}

#[tokio::test]
async fn invalid_token_is_unauthorized() {
    let provider = Arc::new(StubProvider::new(1));
    let app = app_with(provider.clone(), RoleLimits::new(3, 1_000));
    let forged = TokenVerifier::new("other-secret").sign(&Claims {
        sub: "user-1".to_string(),
        role: Some("ADMIN".to_string()),
        exp: None,
    })
    .unwrap();

    let resp = app.oneshot(chat_request(Some(&forged))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["code"], "INVALID_TOKEN");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn anonymous_callers_are_metered_as_free() {
    let app = app_with(Arc::new(StubProvider::new(1)), RoleLimits::new(1, 1_000));

    let resp = app.clone().oneshot(chat_request(None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app.oneshot(chat_request(None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn system_prompt_reaches_provider() {
    let provider = Arc::new(StubProvider::new(1));
    let app = app_with(provider.clone(), RoleLimits::new(3, 1_000));
    app.oneshot(chat_request(Some(&token("user-3", "PLUS"))))
        .await
        .unwrap();

    let sent = provider.last_request.lock().unwrap().clone().unwrap();
    assert_eq!(sent.messages[0].role, MessageRole::System);
    assert_eq!(sent.messages.len(), 2);
}

#[tokio::test]
async fn upstream_timeout_consumes_the_call() {
    let app = app_with(Arc::new(DownProvider), RoleLimits::new(1, 1_000));
    let bearer = token("user-4", "FREE");

    let resp = app
        .clone()
        .oneshot(chat_request(Some(&bearer)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = json_body(resp).await;
    assert_eq!(json["code"], "LLM_TIMEOUT");
    assert_eq!(json["retryable"], true);

    let resp = app.oneshot(chat_request(Some(&bearer))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn empty_messages_are_a_bad_request() {
    let app = app_with(Arc::new(StubProvider::new(1)), RoleLimits::new(3, 1_000));
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/ai/chat")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn usage_reports_without_counting() {
    let app = app_with(Arc::new(StubProvider::new(25)), RoleLimits::new(3, 1_000));
    let bearer = token("user-5", "FREE");
    app.clone()
        .oneshot(chat_request(Some(&bearer)))
        .await
        .unwrap();

    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/usage")
                    .header("authorization", format!("Bearer {}", bearer))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["role"], "FREE");
        assert_eq!(json["limits"]["calls_per_day"], 3);
        assert_eq!(json["record"]["calls"], 1);
        assert_eq!(json["record"]["tokens"], 25);
    }
}
