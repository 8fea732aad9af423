//! Management API tests: the axum app is driven in-process with `oneshot`,
//! backed by the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use token_router::config;
use token_router::router::{RoutingPolicy, TokenRouter};
use token_router::store::memory::MemoryStore;
use token_router::{api, AppState};
use tower::ServiceExt;
use uuid::Uuid;

const ADMIN_KEY: &str = "test-admin-key-0123456789";

fn app() -> (Router, MemoryStore) {
    let store = MemoryStore::new();
    let router = TokenRouter::new(Arc::new(store.clone()), RoutingPolicy::default());
    let cfg = config::from_source(|key| match key {
        "ROUTER_ADMIN_KEY" => Some(ADMIN_KEY.to_string()),
        _ => None,
    })
    .unwrap();
    let state = Arc::new(AppState {
        router,
        config: cfg,
    });
    (api::app(state), store)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY)
        .header("content-type", "application/json");
    let req = match body {
        Some(b) => builder.body(Body::from(b.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(app: &Router, owner: Uuid, vendor: &str, shared: bool) -> Uuid {
    let (status, body) = call(
        app,
        "POST",
        "/api/v1/credentials",
        Some(json!({
            "owner_user_id": owner,
            "vendor": vendor,
            "secret": "sk-test-0123456789abcdef",
            "shared": shared,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.get("secret").is_none(), "secret must not be echoed");
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health_is_public_and_api_requires_key() {
    let (app, _) = app();

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/resolve")
                .header("x-admin-key", "wrong-key")
                .header("content-type", "application/json")
                .body(Body::from(json!({"user_id": Uuid::new_v4(), "vendor": "sora"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_readyz_reflects_store_health() {
    let (app, store) = app();
    let ready = |app: Router| async move {
        app.oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    };
    assert_eq!(ready(app.clone()).await, StatusCode::OK);
    store.set_offline(true);
    assert_eq!(ready(app.clone()).await, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_resolve_returns_generic_unavailable_when_pool_tripped() {
    let (app, _) = app();
    let shared = create(&app, Uuid::new_v4(), "sora", true).await;
    let caller = Uuid::new_v4();

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/resolve",
        Some(json!({"user_id": caller, "vendor": "sora"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_id"], shared.to_string());

    for expected in ["counted", "counted", "tripped"] {
        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/credentials/{}/failures", shared),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], expected);
    }

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/resolve",
        Some(json!({"user_id": caller, "vendor": "sora"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains("breaker") && !message.contains("shared"));
}

#[tokio::test]
async fn test_task_lookup_hides_foreign_tasks() {
    let (app, _) = app();
    let owner = Uuid::new_v4();
    let token = create(&app, owner, "sora", false).await;

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/tasks",
        Some(json!({"user_id": owner, "token_id": token, "task_id": "vid-42", "vendor": "sora"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/sora/vid-42?user_id={}", owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_id"], token.to_string());

    let (foreign_status, foreign_body) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/sora/vid-42?user_id={}", Uuid::new_v4()),
        None,
    )
    .await;
    let (missing_status, missing_body) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/sora/no-such-task?user_id={}", owner),
        None,
    )
    .await;
    assert_eq!(foreign_status, StatusCode::NOT_FOUND);
    assert_eq!(foreign_status, missing_status);
    assert_eq!(foreign_body, missing_body);
}

#[tokio::test]
async fn test_credential_admin_lifecycle() {
    let (app, _) = app();
    let owner = Uuid::new_v4();
    let id = create(&app, owner, "OpenAI", false).await;

    let (status, body) = call(&app, "GET", &format!("/api/v1/credentials?owner_id={}", owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["vendor"], "openai");
    assert_eq!(body[0]["secret_preview"], "sk-t…cdef");

    let (status, _) = call(&app, "POST", &format!("/api/v1/credentials/{}/disable", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/resolve",
        Some(json!({"user_id": owner, "vendor": "openai"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = call(&app, "POST", &format!("/api/v1/credentials/{}/enable", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, "DELETE", &format!("/api/v1/credentials/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = call(&app, "DELETE", &format!("/api/v1/credentials/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_vendor_is_rejected() {
    let (app, _) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/resolve",
        Some(json!({"user_id": Uuid::new_v4(), "vendor": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_metrics_endpoint_is_exposed() {
    let (app, _) = app();
    let _ = call(
        &app,
        "POST",
        "/api/v1/resolve",
        Some(json!({"user_id": Uuid::new_v4(), "vendor": "sora"})),
    )
    .await;

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("token_router_resolutions_total"));
}
