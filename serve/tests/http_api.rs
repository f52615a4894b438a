//! HTTP surface tests over in-memory services and a scripted model.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use env_config::Settings;
use parley::provider::{FinishReason, MockModel, ProviderEvent};
use parley::services::{Services, ServicesBuilder};
use serve::{router, AppState};
use session_event::SessionEvent;

async fn services_with(model: MockModel) -> Arc<Services> {
    ServicesBuilder::new(Settings::default())
        .with_model(Arc::new(model))
        .build()
        .await
        .unwrap()
}

fn app(services: Arc<Services>) -> Router {
    router(Arc::new(AppState { services }))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("X-User-Id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_is_open() {
    let services = services_with(MockModel::replying("hi")).await;
    let response = app(services.clone()).oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    services.shutdown().await;
}

#[tokio::test]
async fn missing_identity_is_401_without_dev_fallback() {
    let mut settings = Settings::default();
    settings.dev_auth_fallback = false;
    let services = ServicesBuilder::new(settings)
        .with_model(Arc::new(MockModel::replying("hi")))
        .build()
        .await
        .unwrap();
    let response = app(services.clone())
        .oneshot(post_json(
            "/runs",
            None,
            serde_json::json!({"input": "hi", "chat_session_id": "s1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    services.shutdown().await;
}

#[tokio::test]
async fn create_run_validates_input() {
    let services = services_with(MockModel::replying("hi")).await;
    let app = app(services.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            "/runs",
            Some("u1"),
            serde_json::json!({"input": "", "chat_session_id": "s1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post_json("/runs", Some("u1"), serde_json::json!({"input": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/runs",
            Some("u1"),
            serde_json::json!({
                "input": "hi",
                "chat_session_id": "s1",
                "agent_user_id": "agent-missing"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    services.shutdown().await;
}

#[tokio::test]
async fn create_run_returns_id_and_executes() {
    let services = services_with(MockModel::replying("the answer")).await;
    let mut sub = services.bus.subscribe("s1", None);

    let response = app(services.clone())
        .oneshot(post_json(
            "/runs",
            Some("u1"),
            serde_json::json!({"input": "question", "chat_session_id": "s1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["run_id"].as_str().unwrap().starts_with("run-"));
    assert!(body["created_at"].is_string());

    // The run streams to the session topic and terminates.
    let mut saw_done = false;
    for _ in 0..20 {
        let item = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        if item.frame.starts_with("event: agent_done\n") {
            saw_done = true;
            break;
        }
    }
    assert!(saw_done);
    services.shutdown().await;
}

#[tokio::test]
async fn webhook_strips_mentions_and_spawns_a_run() {
    let model = MockModel::replying("hello Ann");
    let services = services_with(model).await;
    let mut sub = services.bus.subscribe("S", None);

    let response = app(services.clone())
        .oneshot(post_json(
            "/webhook/message",
            None,
            serde_json::json!({
                "chat_session_id": "S",
                "message_id": "m-1",
                "sender_user_id": "U",
                "agent_user_id": "agent-gpt-5-mini",
                "content": "@[Bot]{agent-gpt-5-mini} hi"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut final_content = None;
    for _ in 0..20 {
        let item = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .unwrap()
            .unwrap();
        if item.frame.starts_with("event: agent_done\n") {
            let data = item.frame.lines().find_map(|l| l.strip_prefix("data: ")).unwrap();
            let payload: serde_json::Value = serde_json::from_str(data).unwrap();
            final_content = Some(payload["final_content"].as_str().unwrap().to_string());
            break;
        }
    }
    assert_eq!(final_content.as_deref(), Some("hello Ann"));

    // The persisted row exists under the agent's identity.
    let rows = services.store.recent_messages("S", 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, "agent-gpt-5-mini");
    services.shutdown().await;
}

#[tokio::test]
async fn webhook_unknown_agent_is_404() {
    let services = services_with(MockModel::replying("x")).await;
    let response = app(services.clone())
        .oneshot(post_json(
            "/webhook/message",
            None,
            serde_json::json!({
                "chat_session_id": "S",
                "message_id": "m-1",
                "sender_user_id": "U",
                "agent_user_id": "agent-unknown",
                "content": "@[Bot]{agent-unknown} hi"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    services.shutdown().await;
}

#[tokio::test]
async fn sse_endpoint_replays_and_ends_on_done() {
    let services = services_with(MockModel::replying("x")).await;
    services.bus.publish(
        "S",
        &SessionEvent::ReasoningSummary { content: "one".into(), delta: true },
    );
    services.bus.publish(
        "S",
        &SessionEvent::ReasoningSummary { content: "two".into(), delta: true },
    );

    // Close the topic shortly after the subscription attaches.
    {
        let services = services.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            services.bus.close_topic("S");
        });
    }

    let request = Request::builder()
        .uri("/events/session/S?user_id=u1")
        .header("Last-Event-ID", "0")
        .body(Body::empty())
        .unwrap();
    let response = app(services.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let one = text.find("\"content\":\"one\"").unwrap();
    let two = text.find("\"content\":\"two\"").unwrap();
    assert!(text.starts_with("event: init\n"));
    assert!(one < two);
    assert!(text.contains("event: done\n"));
    services.shutdown().await;
}

#[tokio::test]
async fn cancel_checks_ownership() {
    let services = services_with(MockModel::replying("x")).await;
    let run = services.registry.create("owner", "hi", "S", "agent-gpt-5-mini");
    let app = app(services.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/runs/{}/cancel", run.id),
            Some("intruder"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(post_json(
            "/runs/run-missing/cancel",
            Some("owner"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    services.shutdown().await;
}

#[tokio::test]
async fn approval_endpoint_maps_resolution_errors() {
    let services = services_with(MockModel::replying("x")).await;
    let request = services.approvals.create(
        "run-1",
        "S",
        "owner",
        "code_execute",
        serde_json::json!({"code": "1"}),
        "reason".into(),
    );
    let app = app(services.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/approvals/{}", request.id),
            Some("intruder"),
            serde_json::json!({"approved": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/approvals/{}", request.id),
            Some("owner"),
            serde_json::json!({"approved": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "approved");

    // An approval transitions at most once.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/approvals/{}", request.id),
            Some("owner"),
            serde_json::json!({"approved": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/approvals/approval-missing",
            Some("owner"),
            serde_json::json!({"approved": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    services.shutdown().await;
}

#[tokio::test]
async fn agents_catalog_and_membership() {
    let services = services_with(MockModel::replying("x")).await;
    let app = app(services.clone());

    let response = app.clone().oneshot(get("/agents?user_id=u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body.as_array().unwrap().len() >= 3);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["user_id"] == "agent-gpt-5-mini"));

    let response = app
        .clone()
        .oneshot(post_json(
            "/agents/add-to-session",
            Some("u1"),
            serde_json::json!({"chat_session_id": "S", "agent_user_id": "agent-gpt-5-mini"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["added"], true);

    // Second insert is a no-op.
    let response = app
        .clone()
        .oneshot(post_json(
            "/agents/add-to-session",
            Some("u1"),
            serde_json::json!({"chat_session_id": "S", "agent_user_id": "agent-gpt-5-mini"}),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["added"], false);

    let response = app
        .oneshot(post_json(
            "/agents/add-to-session",
            Some("u1"),
            serde_json::json!({"chat_session_id": "S", "agent_user_id": "agent-unknown"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    services.shutdown().await;
}

#[tokio::test]
async fn run_metadata_round_trip() {
    let services = services_with(MockModel::replying("x")).await;
    let response = app(services.clone())
        .oneshot(post_json(
            "/runs",
            Some("u1"),
            serde_json::json!({"input": "hello", "chat_session_id": "s1"}),
        ))
        .await
        .unwrap();
    let run_id = json_body(response).await["run_id"].as_str().unwrap().to_string();

    let response = app(services.clone())
        .oneshot(get(&format!("/runs/{run_id}?user_id=u1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["input"], "hello");
    assert_eq!(body["chat_session_id"], "s1");

    let response = app(services.clone())
        .oneshot(get("/runs?user_id=u1"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    services.shutdown().await;
}
