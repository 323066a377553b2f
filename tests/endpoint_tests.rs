//! HTTP endpoint integration tests
//!
//! Covers:
//! - GET /api/health and /api/system/version
//! - project creation, lookup and validation errors
//! - manual trigger and paginated deployment history
//! - status polling payload shape
//! - rollback eligibility over HTTP
//! - push webhook responses

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

mod common;
use common::{
    build_app_state, create_queued_deployment, create_test_db, create_test_project,
    create_test_project_with_secret, default_executor,
};

use dockyard::endpoints::create_router;
use dockyard::services::trigger::{sign, SIGNATURE_HEADER};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// System
// ============================================================================

#[tokio::test]
async fn test_health_check_returns_ok() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(String::from_utf8_lossy(&bytes).trim(), "OK");
}

#[tokio::test]
async fn test_version_endpoint() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, body) = send(&app, get("/api/system/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("version").is_some());
    assert!(body.get("commit_hash").is_some());
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, doc) = send(&app, get("/api/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    let paths = doc["paths"].as_object().unwrap();
    assert!(paths.contains_key("/api/projects/{id}/deployments"));
    assert!(paths.contains_key("/api/deployments/{id}/rollback"));
    assert!(paths.contains_key("/webhooks/{project_id}"));
}

// ============================================================================
// Projects
// ============================================================================

#[tokio::test]
async fn test_create_and_get_project() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, created) = send(
        &app,
        post_json(
            "/api/projects",
            json!({
                "name": "storefront",
                "repository_url": "https://git.example.com/acme/storefront.git",
                "webhook_secret": "super-secret"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "storefront");
    assert_eq!(created["branch"], "main");
    assert!(
        created.get("webhook_secret").is_none(),
        "secrets must never be serialized"
    );

    let id = created["id"].as_i64().unwrap();
    let (status, fetched) = send(&app, get(&format!("/api/projects/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], id);

    let (status, list) = send(&app, get("/api/projects")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_project_validation_and_conflict() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));
    let body = json!({
        "name": "storefront",
        "repository_url": "https://git.example.com/acme/storefront.git"
    });

    let (status, _) = send(&app, post_json("/api/projects", body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, error) = send(&app, post_json("/api/projects", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["detail"].is_string());

    let (status, _) = send(
        &app,
        post_json(
            "/api/projects",
            json!({ "name": "Not A Slug", "repository_url": "https://x/y.git" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_project_is_404() {
    let db = create_test_db().await;
    let app = create_router(build_app_state(db));

    let (status, body) = send(&app, get("/api/projects/77")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("77"));
}

// ============================================================================
// Deployments
// ============================================================================

#[tokio::test]
async fn test_trigger_and_list_deployments() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let app = create_router(build_app_state(db));
    let uri = format!("/api/projects/{}/deployments", project.id);

    for commit in ["aaa111", "bbb222", "ccc333"] {
        let (status, record) =
            send(&app, post_json(&uri, json!({ "commit_hash": commit }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["status"], "queued");
        assert_eq!(record["source"], "manual");
    }

    let (status, page) = send(&app, get(&format!("{}?page=1&per_page=2", uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    let deployments = page["deployments"].as_array().unwrap();
    assert_eq!(deployments.len(), 2);
    assert_eq!(deployments[0]["commit_hash"], "ccc333", "newest first");

    let (status, page) = send(&app, get(&format!("{}?page=2&per_page=2", uri))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["deployments"][0]["commit_hash"], "aaa111");

    let (status, _) = send(&app, post_json(&uri, json!({ "commit_hash": "xyz" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_endpoint_shape() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let record = create_queued_deployment(&db, project.id, "abc123").await;
    let app = create_router(build_app_state(db.clone()));
    let uri = format!("/api/deployments/{}/status", record.id);

    let (status, view) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "queued");
    assert_eq!(view["isFinished"], false);
    assert_eq!(view["buildLogs"], "");
    assert_eq!(view["recommendedPollIntervalMs"], 500);

    default_executor(&db).process(record.id).await.unwrap();

    let (_, view) = send(&app, get(&uri)).await;
    assert_eq!(view["status"], "succeeded");
    assert_eq!(view["isFinished"], true);
    assert_eq!(view["isCurrentProduction"], true);
    assert_eq!(view["dockerImage"], "registry/app:abc123");
    assert!(view.get("recommendedPollIntervalMs").is_none());

    let (status, _) = send(&app, get("/api/deployments/9999/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rollback_endpoint() {
    let db = create_test_db().await;
    let project = create_test_project(&db, "app").await;
    let done = create_queued_deployment(&db, project.id, "abc123").await;
    default_executor(&db).process(done.id).await.unwrap();
    let pending = create_queued_deployment(&db, project.id, "def456").await;
    let app = create_router(build_app_state(db));

    let (status, rollback) = send(
        &app,
        post_json(&format!("/api/deployments/{}/rollback", done.id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rollback["rollback_from_id"], done.id);
    assert_eq!(rollback["docker_image"], "registry/app:abc123");
    assert_eq!(rollback["status"], "queued");

    let (status, error) = send(
        &app,
        post_json(&format!("/api/deployments/{}/rollback", pending.id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["detail"].as_str().unwrap().contains("not eligible"));

    let (status, _) = send(&app, post_json("/api/deployments/9999/rollback", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn test_webhook_responses() {
    let db = create_test_db().await;
    let project = create_test_project_with_secret(&db, "app", "hook-secret").await;
    let app = create_router(build_app_state(db));
    let uri = format!("/webhooks/{}", project.id);

    let push = |git_ref: &str| {
        json!({
            "ref": git_ref,
            "after": "9fceb02d0ae598e95dc970b74767f19372d61af8",
            "head_commit": { "message": "Bump deps" }
        })
        .to_string()
    };
    let signed = |body: &str, signature: &str| {
        Request::builder()
            .uri(&uri)
            .method("POST")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let body = push("refs/heads/main");
    let (status, record) = send(&app, signed(&body, &sign("hook-secret", body.as_bytes()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["source"], "webhook");
    assert_eq!(record["commit_message"], "Bump deps");

    let body = push("refs/heads/develop");
    let (status, skipped) =
        send(&app, signed(&body, &sign("hook-secret", body.as_bytes()))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        skipped["skipped"],
        "branch develop is not tracked (tracking main)"
    );

    let body = push("refs/heads/main");
    let (status, _) = send(&app, signed(&body, "sha256=deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, post_json("/webhooks/9999", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
