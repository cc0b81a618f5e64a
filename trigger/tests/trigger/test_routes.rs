//! Router tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ibackup_trigger::server::serve::router;
use ibackup_trigger::server::state::ServerState;

use crate::common::{Fixture, FixtureBuilder, Guard};

fn app(fx: &Fixture) -> Router {
    router(Arc::new(ServerState::new(fx.runner.clone())))
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request(method, uri)).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_healthcheck() {
    let fx = FixtureBuilder::new(Guard::File).build().await;
    let app = app(&fx);

    let (status, body) = send(&app, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "message": "Healthcheck" }));
}

#[tokio::test]
async fn test_version() {
    let fx = FixtureBuilder::new(Guard::File).build().await;
    let app = app(&fx);

    let (status, body) = send(&app, "GET", "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_post_backup_created_then_exists() {
    let fx = FixtureBuilder::new(Guard::File)
        .script("echo \"Backup Successful.\"\nexit 0")
        .build()
        .await;
    let app = app(&fx);

    let (status, body) = send(&app, "POST", "/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({ "date": "2024-05-01", "message": "Backup created" })
    );

    let (status, body) = send(&app, "POST", "/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({ "date": "2024-05-01", "message": "Backup for today exists" })
    );

    assert_eq!(fx.invocations().len(), 1);
    assert_eq!(fx.api.posts().len(), 1);
}

#[tokio::test]
async fn test_post_backup_failure_points_to_log() {
    let fx = FixtureBuilder::new(Guard::File).script("exit 1").build().await;
    let app = app(&fx);

    let (status, body) = send(&app, "POST", "/backup").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let text = String::from_utf8(body).unwrap();
    let log_path = fx.run_logs().pop().unwrap();
    assert_eq!(
        text,
        format!("Backup failed, see log file '{}'", log_path.display())
    );
    assert!(fx.api.posts().is_empty());
}

#[tokio::test]
async fn test_post_backup_while_running_conflicts() {
    let fx = FixtureBuilder::new(Guard::File)
        .script("echo started\nexec sleep 30")
        .build()
        .await;
    let app = app(&fx);

    let background = app.clone();
    let first = tokio::spawn(async move { send(&background, "POST", "/backup").await });
    assert!(fx.wait_for_log("OUTPUT started", Duration::from_secs(5)).await);

    let (status, body) = send(&app, "GET", "/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["in_progress"], json!(true));

    let (status, body) = send(&app, "POST", "/backup").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body), json!({ "message": "Backup already in progress" }));

    let (status, _) = send(&app, "DELETE", "/backup").await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .expect("cancelled request should finish promptly")
        .unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fx.invocations().len(), 1);
}

#[tokio::test]
async fn test_post_backup_after_close_is_unavailable() {
    let fx = FixtureBuilder::new(Guard::File).build().await;
    let app = app(&fx);
    fx.runner.close();

    let (status, body) = send(&app, "POST", "/backup").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        String::from_utf8(body).unwrap(),
        "Backup failed: Service is shutting down"
    );
    assert!(fx.invocations().is_empty());
}

#[tokio::test]
async fn test_cancel_when_idle() {
    let fx = FixtureBuilder::new(Guard::File).build().await;
    let app = app(&fx);

    let (status, body) = send(&app, "DELETE", "/backup").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body), json!({ "message": "No backup in progress" }));

    let (status, body) = send(&app, "GET", "/backup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({ "in_progress": false, "run_id": null, "started_at": null })
    );
}
