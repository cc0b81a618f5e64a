//! Shared fixtures: a stub Home Assistant API and a shell-script backup tool

#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use ibackup_trigger::app::options::AppOptions;
use ibackup_trigger::app::state::AppState;
use ibackup_trigger::backup::runner::BackupRunner;
use ibackup_trigger::clock::FixedClock;

pub const ENTITY_ID: &str = "input_text.iphone_backup";
pub const API_KEY: &str = "test-token";
pub const DEVICE_UUID: &str = "00008110-000A1B2C3D4E";

pub fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

// ================================ STATUS API STUB ================================ //

/// A POST received by the stub
#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub entity_id: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct StubInner {
    state: Mutex<Option<String>>,
    raw_state: Mutex<Option<String>>,
    post_status: Mutex<Option<StatusCode>>,
    posts: Mutex<Vec<RecordedPost>>,
}

/// Minimal stand-in for the Home Assistant states endpoint
pub struct StubStatusApi {
    pub base_url: String,
    inner: Arc<StubInner>,
    handle: JoinHandle<()>,
}

impl StubStatusApi {
    pub async fn start() -> Self {
        let inner = Arc::new(StubInner::default());
        let app = Router::new()
            .route("/api/states/{entity_id}", get(get_state).post(post_state))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            inner,
            handle,
        }
    }

    /// State returned by GET; `None` answers 404
    pub fn set_state(&self, state: Option<&str>) {
        *self.inner.state.lock().unwrap() = state.map(str::to_string);
    }

    /// Answer every GET with `body` verbatim and a 200 status
    pub fn set_raw_state_body(&self, body: &str) {
        *self.inner.raw_state.lock().unwrap() = Some(body.to_string());
    }

    /// Answer every POST with `status`
    pub fn fail_posts_with(&self, status: StatusCode) {
        *self.inner.post_status.lock().unwrap() = Some(status);
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.inner.posts.lock().unwrap().clone()
    }
}

impl Drop for StubStatusApi {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_state(
    State(inner): State<Arc<StubInner>>,
    UrlPath(entity_id): UrlPath<String>,
) -> Response {
    let raw = inner.raw_state.lock().unwrap().clone();
    if let Some(body) = raw {
        return ([("content-type", "application/json")], body).into_response();
    }

    let state = inner.state.lock().unwrap().clone();
    match state {
        Some(state) => Json(json!({
            "entity_id": entity_id,
            "state": state,
            "attributes": {},
            "last_changed": "2024-04-30T22:00:00+00:00",
            "last_updated": "2024-04-30T22:00:00+00:00",
        }))
        .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Entity not found." }))).into_response(),
    }
}

async fn post_state(
    State(inner): State<Arc<StubInner>>,
    UrlPath(entity_id): UrlPath<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    inner.posts.lock().unwrap().push(RecordedPost {
        entity_id: entity_id.clone(),
        authorization: header("authorization"),
        content_type: header("content-type"),
        body: body.clone(),
    });

    let failure = *inner.post_status.lock().unwrap();
    if let Some(status) = failure {
        return (status, Json(json!({ "message": "Stub failure" }))).into_response();
    }

    let state = body["state"].as_str().map(str::to_string);
    *inner.state.lock().unwrap() = state.clone();
    Json(json!({ "entity_id": entity_id, "state": state })).into_response()
}

// ================================ BACKUP FIXTURE ================================= //

/// Guard strategy for a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    File,
    Api,
}

/// Temporary deployment: script, directories, stub API and a runner wired
/// through the real configuration path
pub struct Fixture {
    pub dir: TempDir,
    pub api: StubStatusApi,
    pub runner: Arc<BackupRunner>,
}

pub struct FixtureBuilder {
    guard: Guard,
    script: String,
    extra_env: Vec<(String, String)>,
    missing_bin: bool,
}

impl FixtureBuilder {
    pub fn new(guard: Guard) -> Self {
        Self {
            guard,
            script: "exit 0".to_string(),
            extra_env: Vec::new(),
            missing_bin: false,
        }
    }

    /// Shell body of the stub backup tool; every invocation is recorded first
    pub fn script(mut self, body: &str) -> Self {
        self.script = body.to_string();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.extra_env.push((key.to_string(), value.to_string()));
        self
    }

    /// Point the backup command at a path that does not exist
    pub fn missing_bin(mut self) -> Self {
        self.missing_bin = true;
        self
    }

    pub async fn build(self) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let api = StubStatusApi::start().await;

        let bin = if self.missing_bin {
            dir.path().join("no-such-idevicebackup2")
        } else {
            write_script(dir.path(), "idevicebackup2", &self.script)
        };

        let mut vars: HashMap<String, String> = [
            ("DEVICE_UUID", DEVICE_UUID.to_string()),
            ("BACKUP_PATH", path_str(&dir.path().join("backups"))),
            ("HASS_BACKUP_ENTITY", ENTITY_ID.to_string()),
            ("HASS_URL", api.base_url.clone()),
            ("HASS_API_KEY", API_KEY.to_string()),
            ("LOG_PATH", path_str(&dir.path().join("logs"))),
            ("BACKUP_BIN_PATH", path_str(&bin)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        match self.guard {
            Guard::File => {
                vars.insert("GUARD_MODE".to_string(), "file".to_string());
                vars.insert("STATE_DIR".to_string(), path_str(&dir.path().join("state")));
            }
            Guard::Api => {
                vars.insert("GUARD_MODE".to_string(), "api".to_string());
            }
        }
        vars.extend(self.extra_env);

        let options = AppOptions::from_lookup(|k| vars.get(k).cloned()).unwrap();
        let state = AppState::init(&options, Arc::new(FixedClock::new(may_first())))
            .await
            .unwrap();

        Fixture {
            dir,
            api,
            runner: state.runner,
        }
    }
}

impl Fixture {
    pub fn logs_dir(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.path().join("state").join("latest-backup-date")
    }

    /// Occupy the marker path with a directory so it can be neither read
    /// nor replaced
    pub fn block_marker(&self) {
        std::fs::create_dir_all(self.marker_path()).unwrap();
    }

    /// Replace the log directory with a plain file
    pub fn block_logs_dir(&self) {
        std::fs::remove_dir_all(self.logs_dir()).unwrap();
        std::fs::write(self.logs_dir(), "not a directory").unwrap();
    }

    pub fn write_marker(&self, value: &str) {
        std::fs::create_dir_all(self.dir.path().join("state")).unwrap();
        std::fs::write(self.marker_path(), value).unwrap();
    }

    pub fn read_marker(&self) -> Option<String> {
        std::fs::read_to_string(self.marker_path()).ok()
    }


    /// Argument lines the stub tool was called with, one per run
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("invocations"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn run_logs(&self) -> Vec<PathBuf> {
        let mut logs: Vec<PathBuf> = match std::fs::read_dir(self.logs_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with("backup_log_") && n.ends_with(".log"))
                        .unwrap_or(false)
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        logs.sort();
        logs
    }

    /// Contents of every run log, oldest first
    pub fn read_logs(&self) -> String {
        self.run_logs()
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Poll the run logs until `needle` shows up
    pub async fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.read_logs().contains(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    pub fn expected_args(&self) -> String {
        format!(
            "backup {} -n -u {}",
            self.dir.path().join("backups").display(),
            DEVICE_UUID
        )
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Write an executable `/bin/sh` script that records its arguments next to
/// itself before running `body`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let contents = format!(
        "#!/bin/sh\necho \"$@\" >> \"$(dirname \"$0\")/invocations\"\n{}\n",
        body
    );
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
